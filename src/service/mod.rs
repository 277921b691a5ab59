pub mod chat_service;

pub use self::chat_service::ChatService;
