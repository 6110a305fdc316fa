pub mod faq;
pub mod ping;
