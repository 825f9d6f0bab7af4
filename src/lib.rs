pub mod logging;
pub mod mail_reader;
pub mod settings;
