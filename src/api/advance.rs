use actix_web::{HttpRequest, HttpResponse, http::StatusCode, web};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{debug, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

use crate::api::employee::{EmployeeSummary, fetch_employee, lock_employee};
use crate::api::salary::to_json;
use crate::auth::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::model::advance::{ADVANCE_COLUMNS, AdvanceRecord, AdvanceType};
use crate::model::payment::PaymentMethod;
use crate::payroll::ledger::{Reconciliation, reconcile, signed_amount};
use crate::payroll::overview::{OverviewSummary, summarize};
use crate::payroll::settlement::{
    BalanceChange, SettlementError, adjust_advance, give_advance, recover_advance,
};
use crate::utils::db_utils::page_offset;
use crate::utils::idempotency::{IdempotencyStore, StoredResponse};
use crate::utils::ledger_cache::{CacheKey, ReadCache};
use crate::utils::money::{format_bdt, round_money};

const DEFAULT_HISTORY_LIMIT: u32 = 10;
const MAX_HISTORY_LIMIT: u32 = 100;

// -------------------- Movements --------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdvanceRequest {
    /// Positive for give/recover, signed for adjust
    #[schema(example = 2000.0)]
    pub amount: Option<Decimal>,
    #[schema(example = "Medical emergency")]
    pub description: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub reference: Option<String>,
}

impl AdvanceRequest {
    fn positive_amount(&self) -> ApiResult<Decimal> {
        match self.amount.map(round_money) {
            None => Err(ApiError::validation("Amount is required")),
            Some(a) if a <= Decimal::ZERO => Err(SettlementError::NonPositiveAmount.into()),
            Some(a) => Ok(a),
        }
    }

    fn adjustment(&self) -> ApiResult<Decimal> {
        let amount = self
            .amount
            .map(round_money)
            .ok_or_else(|| ApiError::validation("Amount is required"))?;
        if amount.is_zero() {
            return Err(SettlementError::ZeroAdjustment.into());
        }
        if self.description().is_none() {
            return Err(ApiError::validation("Adjustments need a description"));
        }
        Ok(amount)
    }

    fn description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdvanceMovementResponse {
    pub message: String,
    pub advance: AdvanceRecord,
    pub employee: EmployeeSummary,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
}

pub fn movement_message(change: &BalanceChange) -> String {
    let verb = match change.kind {
        AdvanceType::Given => "Advance given",
        AdvanceType::Recovered => "Advance recovered",
        AdvanceType::Adjustment => "Advance adjusted",
    };
    format!(
        "{verb}: {}, balance now {}",
        format_bdt(change.amount),
        format_bdt(change.new_balance)
    )
}

/// Applies one ledger movement under the employee row lock.
async fn record_movement<F>(
    pool: &MySqlPool,
    employee_id: u64,
    user_id: u64,
    request: &AdvanceRequest,
    compute: F,
) -> ApiResult<AdvanceMovementResponse>
where
    F: FnOnce(Decimal) -> Result<BalanceChange, SettlementError>,
{
    let mut tx = pool.begin().await?;

    let mut employee = lock_employee(&mut tx, employee_id).await?;
    let change = compute(employee.advance_balance)?;

    let record_id = sqlx::query(
        r#"
        INSERT INTO advance_records
        (employee_id, type, amount, balance_after, payment_method, reference, description, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(employee_id)
    .bind(change.kind)
    .bind(change.amount)
    .bind(change.new_balance)
    .bind(request.payment_method)
    .bind(&request.reference)
    .bind(request.description())
    .bind(user_id)
    .execute(&mut *tx)
    .await?
    .last_insert_id();

    sqlx::query("UPDATE employees SET advance_balance = ? WHERE id = ?")
        .bind(change.new_balance)
        .bind(employee_id)
        .execute(&mut *tx)
        .await?;

    let advance = sqlx::query_as::<_, AdvanceRecord>(&format!(
        "SELECT {ADVANCE_COLUMNS} FROM advance_records WHERE id = ?"
    ))
    .bind(record_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        employee_id,
        kind = %change.kind,
        amount = %change.amount,
        previous = %change.previous_balance,
        new = %change.new_balance,
        "Advance ledger updated"
    );

    employee.advance_balance = change.new_balance;
    Ok(AdvanceMovementResponse {
        message: movement_message(&change),
        advance,
        employee: EmployeeSummary::from(&employee),
        previous_balance: change.previous_balance,
        new_balance: change.new_balance,
    })
}

/// Runs a movement once per idempotency key and drops the stale reads.
#[allow(clippy::too_many_arguments)]
async fn run_movement<F>(
    operation: &str,
    auth: &AuthUser,
    req: &HttpRequest,
    pool: &MySqlPool,
    cache: &ReadCache,
    idempotency: &IdempotencyStore,
    employee_id: u64,
    request: &AdvanceRequest,
    compute: F,
) -> ApiResult<HttpResponse>
where
    F: FnOnce(Decimal) -> Result<BalanceChange, SettlementError>,
{
    let key = IdempotencyStore::key_for(req, operation, auth.user_id)?
        .map(|k| format!("{k}:{employee_id}"));

    let stored = idempotency
        .run(key, async {
            let body = record_movement(pool, employee_id, auth.user_id, request, compute).await?;
            Ok(StoredResponse::new(StatusCode::CREATED, to_json(&body)?))
        })
        .await?;

    cache.invalidate_employee(employee_id);
    Ok(stored.into_response())
}

#[utoipa::path(
    post,
    path = "/api/advances/{employee_id}/give",
    params(
        ("employee_id", Path, description = "Employee ID"),
        ("Idempotency-Key" = Option<String>, Header, description = "Repeat-safe token")
    ),
    request_body = AdvanceRequest,
    responses(
        (status = 201, body = AdvanceMovementResponse),
        (status = 400, description = "Amount missing or not positive"),
        (status = 404, description = "Employee not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Advance"
)]
#[instrument(name = "give_advance", skip_all, fields(employee_id = %path))]
pub async fn give(
    auth: AuthUser,
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    idempotency: web::Data<IdempotencyStore>,
    path: web::Path<u64>,
    body: web::Json<AdvanceRequest>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    let amount = body.positive_amount()?;

    run_movement(
        "give_advance",
        &auth,
        &req,
        &pool,
        &cache,
        &idempotency,
        path.into_inner(),
        &body,
        |balance| give_advance(balance, amount),
    )
    .await
}

#[utoipa::path(
    post,
    path = "/api/advances/{employee_id}/recover",
    params(
        ("employee_id", Path, description = "Employee ID"),
        ("Idempotency-Key" = Option<String>, Header, description = "Repeat-safe token")
    ),
    request_body = AdvanceRequest,
    responses(
        (status = 201, body = AdvanceMovementResponse),
        (status = 400, description = "Amount not positive or above the balance"),
        (status = 404, description = "Employee not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Advance"
)]
#[instrument(name = "recover_advance", skip_all, fields(employee_id = %path))]
pub async fn recover(
    auth: AuthUser,
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    idempotency: web::Data<IdempotencyStore>,
    path: web::Path<u64>,
    body: web::Json<AdvanceRequest>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    let amount = body.positive_amount()?;

    run_movement(
        "recover_advance",
        &auth,
        &req,
        &pool,
        &cache,
        &idempotency,
        path.into_inner(),
        &body,
        |balance| recover_advance(balance, amount),
    )
    .await
}

#[utoipa::path(
    post,
    path = "/api/advances/{employee_id}/adjust",
    params(
        ("employee_id", Path, description = "Employee ID"),
        ("Idempotency-Key" = Option<String>, Header, description = "Repeat-safe token")
    ),
    request_body = AdvanceRequest,
    responses(
        (status = 201, body = AdvanceMovementResponse),
        (status = 400, description = "Zero amount, no description, or balance would go negative"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Employee not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Advance"
)]
#[instrument(name = "adjust_advance", skip_all, fields(employee_id = %path))]
pub async fn adjust(
    auth: AuthUser,
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    idempotency: web::Data<IdempotencyStore>,
    path: web::Path<u64>,
    body: web::Json<AdvanceRequest>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let delta = body.adjustment()?;

    run_movement(
        "adjust_advance",
        &auth,
        &req,
        &pool,
        &cache,
        &idempotency,
        path.into_inner(),
        &body,
        |balance| adjust_advance(balance, delta),
    )
    .await
}

// -------------------- History --------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    /// Default 10, at most 100
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn resolve(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        (page, limit)
    }
}

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AdvanceHistoryEntry {
    pub id: u64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: AdvanceType,
    pub amount: Decimal,
    /// Effect on the balance: negative for recoveries
    #[sqlx(skip)]
    pub signed_amount: Decimal,
    pub balance_after: Decimal,
    pub salary_id: Option<u64>,
    /// Period of the linked salary, for recoveries made at payment
    pub salary_month: Option<u8>,
    pub salary_year: Option<u16>,
    pub payment_method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdvanceHistoryResponse {
    pub employee: EmployeeSummary,
    pub data: Vec<AdvanceHistoryEntry>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

fn total_pages(total: i64, limit: u32) -> i64 {
    let limit = i64::from(limit);
    (total + limit - 1) / limit
}

#[utoipa::path(
    get,
    path = "/api/advances/{employee_id}/history",
    params(("employee_id", Path, description = "Employee ID"), HistoryQuery),
    responses(
        (status = 200, body = AdvanceHistoryResponse),
        (status = 403, description = "Employees may only read their own ledger"),
        (status = 404, description = "Employee not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Advance"
)]
pub async fn history(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    path: web::Path<u64>,
    query: web::Query<HistoryQuery>,
) -> ApiResult<HttpResponse> {
    let employee_id = path.into_inner();
    auth.require_access_to(employee_id)?;
    let (page, limit) = query.resolve();
    let offset = page_offset(page, limit);

    let key = CacheKey::History {
        employee_id,
        page,
        limit,
    };
    let body = cache
        .get_or_try_load(key, async {
            let employee = fetch_employee(pool.get_ref(), employee_id).await?;

            let total: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM advance_records WHERE employee_id = ?")
                    .bind(employee_id)
                    .fetch_one(pool.get_ref())
                    .await?;

            let mut data = sqlx::query_as::<_, AdvanceHistoryEntry>(
                r#"
                SELECT a.id, a.type, a.amount, a.balance_after, a.salary_id,
                       s.month AS salary_month, s.year AS salary_year,
                       a.payment_method, a.reference, a.description, a.created_by, a.created_at
                FROM advance_records a
                LEFT JOIN salaries s ON s.id = a.salary_id
                WHERE a.employee_id = ?
                ORDER BY a.id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(employee_id)
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(pool.get_ref())
            .await?;

            for entry in &mut data {
                entry.signed_amount = signed_amount(entry.kind, entry.amount);
            }
            debug!(employee_id, page, limit, rows = data.len(), "Advance history loaded");

            to_json(&AdvanceHistoryResponse {
                employee: EmployeeSummary::from(&employee),
                data,
                page,
                limit,
                total,
                total_pages: total_pages(total, limit),
            })
        })
        .await?;

    Ok(HttpResponse::Ok().json(body))
}

// -------------------- Overview --------------------

#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct AdvanceOverviewEntry {
    pub id: u64,
    pub name: String,
    pub employee_code: String,
    pub advance_balance: Decimal,
    pub last_transaction_type: Option<AdvanceType>,
    pub last_transaction_amount: Option<Decimal>,
    pub last_transaction_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdvanceOverviewResponse {
    pub summary: OverviewSummary,
    pub employees: Vec<AdvanceOverviewEntry>,
}

#[utoipa::path(
    get,
    path = "/api/advances/overview",
    responses((status = 200, body = AdvanceOverviewResponse)),
    security(("bearer_auth" = [])),
    tag = "Advance"
)]
pub async fn overview(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;

    let body = cache
        .get_or_try_load(CacheKey::Overview, async {
            let employees = sqlx::query_as::<_, AdvanceOverviewEntry>(
                r#"
                SELECT e.id, e.name, e.employee_code, e.advance_balance,
                       a.type AS last_transaction_type,
                       a.amount AS last_transaction_amount,
                       a.created_at AS last_transaction_at
                FROM employees e
                LEFT JOIN advance_records a
                  ON a.id = (SELECT MAX(r.id) FROM advance_records r WHERE r.employee_id = e.id)
                WHERE e.advance_balance <> 0 OR a.id IS NOT NULL
                ORDER BY e.advance_balance DESC, e.id ASC
                "#,
            )
            .fetch_all(pool.get_ref())
            .await?;

            let summary = summarize(employees.iter().map(|e| e.advance_balance));
            to_json(&AdvanceOverviewResponse { summary, employees })
        })
        .await?;

    Ok(HttpResponse::Ok().json(body))
}

// -------------------- Reconcile --------------------

#[utoipa::path(
    get,
    path = "/api/advances/{employee_id}/reconcile",
    params(("employee_id", Path, description = "Employee ID")),
    responses(
        (status = 200, body = Reconciliation),
        (status = 404, description = "Employee not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Advance"
)]
pub async fn reconcile_ledger(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    let employee_id = path.into_inner();

    let employee = fetch_employee(pool.get_ref(), employee_id).await?;
    let records = sqlx::query_as::<_, AdvanceRecord>(&format!(
        "SELECT {ADVANCE_COLUMNS} FROM advance_records WHERE employee_id = ? ORDER BY id ASC"
    ))
    .bind(employee_id)
    .fetch_all(pool.get_ref())
    .await?;

    let report: Reconciliation = reconcile(employee_id, employee.advance_balance, &records);
    if !report.consistent {
        warn!(
            employee_id,
            ledger = %report.ledger_balance,
            stored = %report.stored_balance,
            "Advance ledger out of balance"
        );
    }

    Ok(HttpResponse::Ok().json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{bearer_for, lazy_pool, test_config};
    use actix_web::{App, test as atest};
    use rust_decimal_macros::dec;
    use serde_json::{Value, json};
    use std::time::Duration;

    macro_rules! app {
        () => {
            atest::init_service(
                App::new()
                    .app_data(web::Data::new(lazy_pool()))
                    .app_data(web::Data::new(test_config()))
                    .app_data(web::Data::new(ReadCache::new(Duration::from_secs(60))))
                    .app_data(web::Data::new(IdempotencyStore::new(Duration::from_secs(60))))
                    .route("/advances/overview", web::get().to(overview))
                    .route("/advances/{id}/give", web::post().to(give))
                    .route("/advances/{id}/recover", web::post().to(recover))
                    .route("/advances/{id}/adjust", web::post().to(adjust))
                    .route("/advances/{id}/history", web::get().to(history)),
            )
            .await
        };
    }

    async fn post(uri: &str, role: Role, body: Value) -> (StatusCode, Value) {
        let app = app!();
        let req = atest::TestRequest::post()
            .uri(uri)
            .insert_header(bearer_for(role, None))
            .set_json(body)
            .to_request();
        let resp = atest::call_service(&app, req).await;
        let status = resp.status();
        let body: Value = atest::read_body_json(resp).await;
        (status, body)
    }

    #[actix_web::test]
    async fn give_with_zero_or_missing_amount_is_rejected_up_front() {
        let (status, body) = post("/advances/1/give", Role::Hr, json!({"amount": 0})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Amount must be greater than zero");

        let (status, body) = post("/advances/1/give", Role::Hr, json!({"description": "x"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Amount is required");

        let (status, _) = post("/advances/1/recover", Role::Hr, json!({"amount": -5})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn sub_paisa_amounts_count_as_zero() {
        let (status, body) = post("/advances/1/give", Role::Hr, json!({"amount": 0.001})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Amount must be greater than zero");

        let (status, body) = post(
            "/advances/1/adjust",
            Role::Admin,
            json!({"amount": -0.004, "description": "rounding"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Adjustment amount must not be zero");
    }

    #[actix_web::test]
    async fn adjust_is_admin_only_and_needs_a_description() {
        let (status, _) = post("/advances/1/adjust", Role::Hr, json!({"amount": 100, "description": "fix"})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = post("/advances/1/adjust", Role::Admin, json!({"amount": -100, "description": "  "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Adjustments need a description");

        let (status, _) = post("/advances/1/adjust", Role::Admin, json!({"amount": 0, "description": "noop"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn employees_cannot_move_money_or_see_the_overview() {
        let (status, _) = post("/advances/1/give", Role::Employee, json!({"amount": 100})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let app = app!();
        let req = atest::TestRequest::get()
            .uri("/advances/overview")
            .insert_header(bearer_for(Role::Employee, Some(1)))
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = atest::TestRequest::get()
            .uri("/advances/2/history")
            .insert_header(bearer_for(Role::Employee, Some(1)))
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn last_possible_history_page_is_served_without_overflow() {
        let app = app!();
        let req = atest::TestRequest::get()
            .uri("/advances/1/history?page=4294967295&limit=10")
            .insert_header(bearer_for(Role::Hr, None))
            .to_request();
        // Reaches the (unreachable) database instead of failing on the offset.
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn history_paging_defaults_and_bounds() {
        let q = HistoryQuery { page: None, limit: None };
        assert_eq!(q.resolve(), (1, 10));
        let q = HistoryQuery { page: Some(0), limit: Some(500) };
        assert_eq!(q.resolve(), (1, 100));
        let q = HistoryQuery { page: Some(3), limit: Some(0) };
        assert_eq!(q.resolve(), (3, 1));
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }

    #[test]
    fn movement_messages_show_bdt_amounts() {
        let change = give_advance(dec!(0), dec!(2000)).unwrap();
        assert_eq!(change.kind, AdvanceType::Given);
        assert_eq!(change.new_balance, dec!(2000));
        assert_eq!(movement_message(&change), "Advance given: ৳2,000.00, balance now ৳2,000.00");

        let change = recover_advance(dec!(2000), dec!(500)).unwrap();
        assert_eq!(movement_message(&change), "Advance recovered: ৳500.00, balance now ৳1,500.00");
    }
}
