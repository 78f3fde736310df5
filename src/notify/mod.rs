//! Notifications module

mod toast;

pub use self::toast::{Toast, ToastLevel, ToastNotifier};
