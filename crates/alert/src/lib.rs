pub mod dispatcher;
pub mod message;
pub mod telegram;

pub use dispatcher::AlertDispatcher;
pub use message::render;
pub use telegram::TelegramSink;
