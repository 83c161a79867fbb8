use crate::{
    api::{advance, employee, payment, salary},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::ApiError,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::anyhow;
use std::sync::Arc;

type LimiterConfig = GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware>;

/// Per-route limiter settings, built once at startup.
pub struct RateLimits {
    login: LimiterConfig,
    refresh: LimiterConfig,
    protected: LimiterConfig,
}

impl RateLimits {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            login: build_limiter("RATE_LOGIN_PER_MIN", config.rate_login_per_min)?,
            refresh: build_limiter("RATE_REFRESH_PER_MIN", config.rate_refresh_per_min)?,
            protected: build_limiter("RATE_PROTECTED_PER_MIN", config.rate_protected_per_min)?,
        })
    }
}

fn build_limiter(name: &str, requests_per_min: u32) -> anyhow::Result<LimiterConfig> {
    let per_ms = if requests_per_min == 0 {
        1
    } else {
        60_000 / requests_per_min as u64
    };
    GovernorConfigBuilder::default()
        .per_millisecond(per_ms.max(1))
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("{name} must be greater than zero"))
}

/// Malformed JSON, query strings and path segments answer 400 with the usual body.
fn extractor_errors(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| ApiError::validation(format!("Invalid JSON body: {err}")).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| ApiError::validation(format!("Invalid query: {err}")).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _| ApiError::validation(format!("Invalid path: {err}")).into()),
    );
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limits: &RateLimits) {
    let login_limiter = Arc::new(Governor::new(&limits.login));
    let refresh_limiter = Arc::new(Governor::new(&limits.refresh));
    let protected_limiter = Arc::new(Governor::new(&limits.protected));

    extractor_errors(cfg);

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter)
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(web::resource("/users").route(web::post().to(handlers::register)))
            .service(
                web::scope("/employees")
                    // /employees
                    .service(
                        web::resource("")
                            .route(web::post().to(employee::create_employee))
                            .route(web::get().to(employee::list_employees)),
                    )
                    // /employees/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::put().to(employee::update_employee))
                            .route(web::get().to(employee::get_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    ),
            )
            .service(
                web::scope("/salaries")
                    .service(web::resource("").route(web::get().to(salary::list_salaries)))
                    // fixed segments before /{id}
                    .service(web::resource("/preview").route(web::get().to(salary::salary_preview)))
                    .service(web::resource("/pay").route(web::post().to(salary::pay_salary)))
                    .service(
                        web::resource("/generate")
                            .route(web::post().to(salary::generate_monthly_salaries)),
                    )
                    .service(web::resource("/{id}").route(web::put().to(salary::update_salary))),
            )
            .service(
                web::scope("/advances")
                    .service(web::resource("/overview").route(web::get().to(advance::overview)))
                    .service(web::resource("/{employee_id}/give").route(web::post().to(advance::give)))
                    .service(
                        web::resource("/{employee_id}/recover").route(web::post().to(advance::recover)),
                    )
                    .service(
                        web::resource("/{employee_id}/adjust").route(web::post().to(advance::adjust)),
                    )
                    .service(
                        web::resource("/{employee_id}/history").route(web::get().to(advance::history)),
                    )
                    .service(
                        web::resource("/{employee_id}/reconcile")
                            .route(web::get().to(advance::reconcile_ledger)),
                    ),
            )
            .service(web::resource("/payments").route(web::get().to(payment::list_payments))),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new pair, the old refresh token is revoked

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{bearer_for, lazy_pool, test_config};
    use crate::utils::{idempotency::IdempotencyStore, ledger_cache::ReadCache};
    use actix_web::{App, http::StatusCode, test as atest};
    use serde_json::{Value, json};
    use std::time::Duration;

    #[test]
    fn zero_rate_is_a_config_error() {
        assert!(build_limiter("RATE_LOGIN_PER_MIN", 0).is_err());
        assert!(build_limiter("RATE_LOGIN_PER_MIN", 60).is_ok());
    }

    macro_rules! app {
        () => {{
            let config = test_config();
            let limits = RateLimits::from_config(&config).unwrap();
            atest::init_service(
                App::new()
                    .app_data(web::Data::new(lazy_pool()))
                    .app_data(web::Data::new(config.clone()))
                    .app_data(web::Data::new(ReadCache::new(Duration::from_secs(60))))
                    .app_data(web::Data::new(IdempotencyStore::new(Duration::from_secs(60))))
                    .configure(|cfg| configure(cfg, &config, &limits)),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn protected_scope_requires_a_bearer_token() {
        let app = app!();
        let req = atest::TestRequest::get()
            .uri("/api/advances/overview")
            .peer_addr("127.0.0.1:4000".parse().unwrap())
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = atest::read_body_json(resp).await;
        assert_eq!(body["message"], "Missing Authorization header");
    }

    #[actix_web::test]
    async fn malformed_body_is_a_json_400() {
        let app = app!();
        let req = atest::TestRequest::post()
            .uri("/api/advances/1/give")
            .peer_addr("127.0.0.1:4000".parse().unwrap())
            .insert_header(bearer_for(Role::Hr, None))
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = atest::read_body_json(resp).await;
        assert!(body["message"].as_str().unwrap().starts_with("Invalid JSON body"));
    }

    #[actix_web::test]
    async fn preview_is_not_swallowed_by_the_salary_id_route() {
        let app = app!();
        let req = atest::TestRequest::get()
            .uri("/api/salaries/preview?employee_id=1&month=13&year=2026")
            .peer_addr("127.0.0.1:4000".parse().unwrap())
            .insert_header(bearer_for(Role::Hr, None))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = atest::TestRequest::post()
            .uri("/api/advances/1/give")
            .peer_addr("127.0.0.1:4000".parse().unwrap())
            .insert_header(bearer_for(Role::Hr, None))
            .set_json(json!({"amount": 0}))
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
