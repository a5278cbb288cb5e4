use super::handlers::{auth, health};
use utoipa::openapi::{InfoBuilder, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both
/// served and included in the generated spec. Routes added outside (like
/// `/`) are intentionally not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut auth_tag = Tag::new("auth");
    auth_tag.description =
        Some("Account lifecycle, OTP verification, and session rotation".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service liveness".to_string());

    let mut base = cargo_openapi();
    base.tags = Some(vec![auth_tag, health_tag]);

    // `routes!` reads #[utoipa::path] to bind HTTP method + path.
    let router = OpenApiRouter::with_openapi(base)
        .routes(routes!(health::health))
        .routes(routes!(auth::account::signup))
        .routes(routes!(auth::account::signin))
        .routes(routes!(auth::account::signout))
        .routes(routes!(auth::verification::verify_otp))
        .routes(routes!(auth::verification::resend_otp))
        .routes(routes!(auth::verification::forgot_password))
        .routes(routes!(auth::verification::reset_password))
        .routes(routes!(auth::session::rotate));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    OpenApiBuilder::new().info(info).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn auth_routes_are_documented() {
        let spec = openapi();
        for path in [
            "/v1/auth/signup",
            "/v1/auth/signin",
            "/v1/auth/signout",
            "/v1/auth/verify-otp",
            "/v1/auth/resend-otp",
            "/v1/auth/forgot-password",
            "/v1/auth/reset-password",
            "/v1/auth/refresh",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
