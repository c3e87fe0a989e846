pub mod bot;
pub mod intent;
