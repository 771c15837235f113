mod source;

pub use source::TelegramSource;
