use actix_web::error::InternalError;
use actix_web::web;
use actix_web::HttpResponse;
use actix_web_flash_messages::FlashMessage;
use secrecy::Secret;
use serde::Deserialize;

use crate::authentication::validate_credentials;
use crate::authentication::AuthError;
use crate::authentication::Credentials;
use crate::session_state::TypedSession;
use crate::startup::AppState;
use crate::utils::redirect;

/// Login credentials
#[derive(Deserialize)]
pub struct FormData {
    username: String,
    password: Secret<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum LoginError {
    #[error("Authentication failed")]
    AuthError(#[source] anyhow::Error),
    #[error("Something went wrong")]
    UnexpectedError(#[from] anyhow::Error),
}

/// `POST` endpoint (`login`). On success, renews the session (mitigating
/// session fixation) and redirects into `/admin`. On failure, the error is
/// carried as a flash message and the user is redirected back to `/login`
/// with HTTP 303 rather than a plain 400, so a form resubmission on refresh
/// doesn't resend credentials.
pub async fn login(
    form: web::Form<FormData>,
    state: web::Data<AppState>,
    session: TypedSession,
) -> Result<HttpResponse, InternalError<LoginError>> {
    let credentials = Credentials { username: form.0.username, password: form.0.password };

    match validate_credentials(credentials, &state.pool).await {
        Ok(user_id) => {
            session.renew();
            session.insert_user_id(user_id).map_err(|e| login_redirect(LoginError::UnexpectedError(e.into())))?;
            Ok(redirect("/health"))
        }
        Err(e) => {
            let e = match e {
                AuthError::InvalidCredentials(_) => LoginError::AuthError(e.into()),
                AuthError::UnexpectedError(_) => LoginError::UnexpectedError(e.into()),
            };
            Err(login_redirect(e))
        }
    }
}

/// Wraps the error in the `/login`-redirecting HTTP response this handler's
/// return type requires (`InternalError`'s type param is the original error,
/// not the response carried alongside it).
fn login_redirect(e: LoginError) -> InternalError<LoginError> {
    FlashMessage::error(e.to_string()).send();
    let response = redirect("/login");
    InternalError::from_response(e, response)
}
