pub mod admin;
pub mod health_check;
pub mod login;

pub use health_check::health_check;
pub use login::login;
pub use login::login_form;
