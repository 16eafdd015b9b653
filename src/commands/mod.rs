pub mod chat;
pub mod history;
pub mod post;
pub mod tail;
