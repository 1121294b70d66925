//! 内置作业处理器
//! Built-in job handlers

mod dispatch;
mod webhook;

pub use dispatch::DispatchHandler;
pub use webhook::WebhookHandler;
