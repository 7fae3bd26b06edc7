use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::pipeline::extract_identity;

/// Identity middleware: attaches an `AuthContext` to every request.
///
/// Unlike a guard this never rejects; a missing or invalid bearer token
/// yields the guest context and the per-action policy decides what a guest
/// may do.
pub async fn identity_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let auth = extract_identity(request.headers(), &state.jwt_secret);
    request.extensions_mut().insert(auth);

    next.run(request).await
}
