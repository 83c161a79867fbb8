use actix_web::{HttpRequest, HttpResponse, http::StatusCode, web};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlPool, Transaction};
use std::collections::HashSet;
use tracing::{debug, info, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::api::employee::{EmployeeSummary, fetch_employee, lock_employee};
use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::model::advance::AdvanceType;
use crate::model::employee::{EMPLOYEE_COLUMNS, Employee};
use crate::model::payment::{Payment, PaymentMethod};
use crate::model::salary::{SALARY_COLUMNS, Salary, SalaryStatus};
use crate::payroll::generation::{GenerationSummary, plan_monthly_salaries};
use crate::payroll::settlement::{
    AdvanceInfo, DeductionPolicy, SalaryComponents, SalarySettlement, advance_info, settle_salary,
};
use crate::utils::db_utils::page_offset;
use crate::utils::dates::{normalize_to_utc_midnight, validate_period};
use crate::utils::idempotency::{IdempotencyStore, StoredResponse};
use crate::utils::ledger_cache::{CacheKey, ReadCache};
use crate::utils::money::format_bdt;

// -------------------- Preview --------------------

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PreviewQuery {
    #[param(example = 1)]
    pub employee_id: u64,
    #[param(example = 3)]
    pub month: u8,
    #[param(example = 2026)]
    pub year: u16,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SalaryBreakdown {
    pub salary_id: u64,
    pub status: SalaryStatus,
    pub base_salary: Decimal,
    pub allowances: Decimal,
    pub overtime_hours: Decimal,
    pub overtime_amount: Decimal,
    pub bonus: Decimal,
    pub deductions: Decimal,
    pub gross_salary: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SalaryPreview {
    pub employee: EmployeeSummary,
    pub month: u8,
    pub year: u16,
    pub breakdown: SalaryBreakdown,
    pub advance: AdvanceInfo,
}

/// A paid salary has nothing left to deduct from.
pub fn build_preview(employee: &Employee, salary: &Salary, policy: &DeductionPolicy) -> SalaryPreview {
    let advance = if salary.is_paid() {
        AdvanceInfo {
            current_balance: employee.advance_balance,
            max_deduction: Decimal::ZERO,
            suggested_deduction: Decimal::ZERO,
        }
    } else {
        advance_info(employee.advance_balance, salary.gross_salary, policy)
    };

    SalaryPreview {
        employee: EmployeeSummary::from(employee),
        month: salary.month,
        year: salary.year,
        breakdown: SalaryBreakdown {
            salary_id: salary.id,
            status: salary.status,
            base_salary: salary.base_salary,
            allowances: salary.allowances,
            overtime_hours: salary.overtime_hours,
            overtime_amount: salary.overtime_amount,
            bonus: salary.bonus,
            deductions: salary.deductions,
            gross_salary: salary.gross_salary,
        },
        advance,
    }
}

async fn fetch_salary_for_period(
    pool: &MySqlPool,
    employee_id: u64,
    month: u8,
    year: u16,
) -> ApiResult<Option<Salary>> {
    let sql = format!(
        "SELECT {SALARY_COLUMNS} FROM salaries WHERE employee_id = ? AND month = ? AND year = ?"
    );
    Ok(sqlx::query_as::<_, Salary>(&sql)
        .bind(employee_id)
        .bind(month)
        .bind(year)
        .fetch_optional(pool)
        .await?)
}

#[utoipa::path(
    get,
    path = "/api/salaries/preview",
    params(PreviewQuery),
    responses(
        (status = 200, body = SalaryPreview),
        (status = 404, description = "Employee or salary for the period not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn salary_preview(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    cache: web::Data<ReadCache>,
    query: web::Query<PreviewQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    validate_period(query.month, query.year)?;

    let PreviewQuery {
        employee_id,
        month,
        year,
    } = query.into_inner();
    let policy = DeductionPolicy::new(config.suggested_deduction_percent);

    let key = CacheKey::Preview {
        employee_id,
        month,
        year,
    };
    let preview = cache
        .get_or_try_load(key, async {
            let employee = fetch_employee(pool.get_ref(), employee_id).await?;
            let salary = fetch_salary_for_period(pool.get_ref(), employee_id, month, year)
                .await?
                .ok_or_else(|| {
                    ApiError::not_found(format!(
                        "No salary generated for {month:02}/{year}; generate monthly salaries first"
                    ))
                })?;
            to_json(&build_preview(&employee, &salary, &policy))
        })
        .await?;

    Ok(HttpResponse::Ok().json(preview))
}

// -------------------- Pay --------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct PaySalaryRequest {
    #[schema(example = 1)]
    pub employee_id: u64,
    #[schema(example = 3)]
    pub month: u8,
    #[schema(example = 2026)]
    pub year: u16,
    /// `YYYY-MM-DD` or ISO-8601; stored as midnight UTC
    #[schema(example = "2026-04-01")]
    pub paid_date: String,
    /// Defaults to 0; must not exceed min(advance balance, gross salary)
    #[schema(example = 5000.0)]
    pub advance_deduction: Option<Decimal>,
    pub payment_method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdvanceDeductionResult {
    pub previous_balance: Decimal,
    pub deducted: Decimal,
    pub new_balance: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaySalaryResponse {
    pub message: String,
    pub payment: Payment,
    pub salary: Salary,
    pub employee: EmployeeSummary,
    pub advance_deduction: AdvanceDeductionResult,
    pub gross_salary: Decimal,
    pub net_paid: Decimal,
}

pub fn payment_message(settlement: &SalarySettlement) -> String {
    if settlement.advance_deducted.is_zero() {
        format!("Salary paid: {}", format_bdt(settlement.net_paid))
    } else {
        format!(
            "Salary paid: {} (advance recovered {}, remaining advance {})",
            format_bdt(settlement.net_paid),
            format_bdt(settlement.advance_deducted),
            format_bdt(settlement.new_balance)
        )
    }
}

async fn lock_salary_for_period(
    tx: &mut Transaction<'_, MySql>,
    employee_id: u64,
    month: u8,
    year: u16,
) -> ApiResult<Salary> {
    let sql = format!(
        "SELECT {SALARY_COLUMNS} FROM salaries \
         WHERE employee_id = ? AND month = ? AND year = ? FOR UPDATE"
    );
    sqlx::query_as::<_, Salary>(&sql)
        .bind(employee_id)
        .bind(month)
        .bind(year)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No salary generated for {month:02}/{year}")))
}

async fn record_salary_payment(
    pool: &MySqlPool,
    user_id: u64,
    payload: &PaySalaryRequest,
    paid_date: DateTime<Utc>,
) -> ApiResult<PaySalaryResponse> {
    let mut tx = pool.begin().await?;

    // employee row first, then salary: same lock order as advance movements
    let mut employee = lock_employee(&mut tx, payload.employee_id).await?;
    let mut salary =
        lock_salary_for_period(&mut tx, payload.employee_id, payload.month, payload.year).await?;

    if salary.is_paid() {
        return Err(ApiError::conflict(format!(
            "Salary for {:02}/{} is already paid",
            payload.month, payload.year
        )));
    }

    let settlement = settle_salary(
        salary.gross_salary,
        employee.advance_balance,
        payload.advance_deduction,
    )?;

    sqlx::query(
        r#"
        UPDATE salaries
        SET advance_deduction = ?, net_salary = ?, status = ?, paid_date = ?
        WHERE id = ?
        "#,
    )
    .bind(settlement.advance_deducted)
    .bind(settlement.net_paid)
    .bind(SalaryStatus::Paid)
    .bind(paid_date)
    .bind(salary.id)
    .execute(&mut *tx)
    .await?;

    let payment_id = sqlx::query(
        r#"
        INSERT INTO payments
        (salary_id, employee_id, amount, payment_method, reference, notes, paid_date)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(salary.id)
    .bind(employee.id)
    .bind(settlement.net_paid)
    .bind(payload.payment_method)
    .bind(&payload.reference)
    .bind(&payload.notes)
    .bind(paid_date)
    .execute(&mut *tx)
    .await?
    .last_insert_id();

    if !settlement.advance_deducted.is_zero() {
        sqlx::query("UPDATE employees SET advance_balance = ? WHERE id = ?")
            .bind(settlement.new_balance)
            .bind(employee.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO advance_records
            (employee_id, type, amount, balance_after, salary_id, payment_method, reference, description, created_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(employee.id)
        .bind(AdvanceType::Recovered)
        .bind(settlement.advance_deducted)
        .bind(settlement.new_balance)
        .bind(salary.id)
        .bind(payload.payment_method)
        .bind(&payload.reference)
        .bind(format!(
            "Recovered from salary {:02}/{}",
            payload.month, payload.year
        ))
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        employee_id = employee.id,
        salary_id = salary.id,
        gross = %settlement.gross_salary,
        deducted = %settlement.advance_deducted,
        net = %settlement.net_paid,
        "Salary paid"
    );

    salary.advance_deduction = settlement.advance_deducted;
    salary.net_salary = settlement.net_paid;
    salary.status = SalaryStatus::Paid;
    salary.paid_date = Some(paid_date);
    employee.advance_balance = settlement.new_balance;

    Ok(PaySalaryResponse {
        message: payment_message(&settlement),
        payment: Payment {
            id: payment_id,
            salary_id: salary.id,
            employee_id: employee.id,
            amount: settlement.net_paid,
            payment_method: payload.payment_method,
            reference: payload.reference.clone(),
            notes: payload.notes.clone(),
            paid_date,
        },
        employee: EmployeeSummary::from(&employee),
        salary,
        advance_deduction: AdvanceDeductionResult {
            previous_balance: settlement.previous_balance,
            deducted: settlement.advance_deducted,
            new_balance: settlement.new_balance,
        },
        gross_salary: settlement.gross_salary,
        net_paid: settlement.net_paid,
    })
}

/// One client token covers one employee's salary for one period.
fn payment_idempotency_key(
    req: &HttpRequest,
    user_id: u64,
    payload: &PaySalaryRequest,
) -> ApiResult<Option<String>> {
    Ok(IdempotencyStore::key_for(req, "pay_salary", user_id)?.map(|k| {
        format!("{k}:{}:{}-{:02}", payload.employee_id, payload.year, payload.month)
    }))
}

#[utoipa::path(
    post,
    path = "/api/salaries/pay",
    request_body = PaySalaryRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Repeat-safe token")
    ),
    responses(
        (status = 200, body = PaySalaryResponse),
        (status = 400, description = "Invalid period, date or deduction"),
        (status = 404, description = "Employee or salary not found"),
        (status = 409, description = "Salary already paid")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
#[instrument(
    name = "pay_salary",
    skip_all,
    fields(employee_id = payload.employee_id, month = payload.month, year = payload.year)
)]
pub async fn pay_salary(
    auth: AuthUser,
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    idempotency: web::Data<IdempotencyStore>,
    payload: web::Json<PaySalaryRequest>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;

    let payload = payload.into_inner();
    validate_period(payload.month, payload.year)?;
    let paid_date = normalize_to_utc_midnight(&payload.paid_date)?;
    if payload.advance_deduction.is_some_and(|d| d < Decimal::ZERO) {
        return Err(ApiError::validation("Advance deduction must not be negative"));
    }

    let key = payment_idempotency_key(&req, auth.user_id, &payload)?;
    let stored = idempotency
        .run(key, async {
            let body = record_salary_payment(pool.get_ref(), auth.user_id, &payload, paid_date).await?;
            Ok(StoredResponse::new(StatusCode::OK, to_json(&body)?))
        })
        .await?;

    cache.invalidate_employee(payload.employee_id);
    Ok(stored.into_response())
}

// -------------------- Generate --------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateSalariesRequest {
    #[schema(example = 3)]
    pub month: u8,
    #[schema(example = 2026)]
    pub year: u16,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GenerateSalariesResponse {
    pub message: String,
    pub summary: GenerationSummary,
}

#[utoipa::path(
    post,
    path = "/api/salaries/generate",
    request_body = GenerateSalariesRequest,
    responses(
        (status = 200, body = GenerateSalariesResponse),
        (status = 400, description = "Invalid period")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
#[instrument(name = "generate_salaries", skip_all, fields(month = payload.month, year = payload.year))]
pub async fn generate_monthly_salaries(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    payload: web::Json<GenerateSalariesRequest>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    let GenerateSalariesRequest { month, year } = payload.into_inner();
    validate_period(month, year)?;

    let mut tx = pool.begin().await?;

    let employees = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE is_active = TRUE"
    ))
    .fetch_all(&mut *tx)
    .await?;

    let existing: HashSet<u64> =
        sqlx::query_scalar::<_, u64>("SELECT employee_id FROM salaries WHERE month = ? AND year = ?")
            .bind(month)
            .bind(year)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();

    let plan = plan_monthly_salaries(&employees, &existing, month, year);
    debug!(to_create = plan.to_create.len(), skipped = plan.skipped, "Generation planned");

    let mut created = 0u64;
    for salary in &plan.to_create {
        // the unique (employee_id, month, year) key absorbs a concurrent run
        created += sqlx::query(
            r#"
            INSERT IGNORE INTO salaries
            (employee_id, month, year, base_salary, allowances, gross_salary, net_salary, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(salary.employee_id)
        .bind(salary.month)
        .bind(salary.year)
        .bind(salary.base_salary)
        .bind(salary.allowances)
        .bind(salary.gross_salary)
        .bind(salary.gross_salary)
        .bind(SalaryStatus::Unpaid)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    tx.commit().await?;

    let total_active = employees.len() as u64;
    let summary = GenerationSummary {
        created,
        skipped: total_active - created,
        total_active,
    };
    info!(created, skipped = summary.skipped, "Monthly salaries generated");

    if created > 0 {
        cache.invalidate_all();
    }

    Ok(HttpResponse::Ok().json(GenerateSalariesResponse {
        message: format!(
            "Generated {} salaries for {month:02}/{year}, skipped {}",
            summary.created, summary.skipped
        ),
        summary,
    }))
}

// -------------------- List --------------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SalaryQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub employee_id: Option<u64>,
    pub month: Option<u8>,
    pub year: Option<u16>,
    pub status: Option<SalaryStatus>,
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedSalaryResponse {
    pub data: Vec<Salary>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[utoipa::path(
    get,
    path = "/api/salaries",
    params(SalaryQuery),
    responses((status = 200, body = PaginatedSalaryResponse)),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn list_salaries(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<SalaryQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = page_offset(page, per_page);

    // ---------- build WHERE clause dynamically ----------
    let mut conditions = Vec::new();
    if query.employee_id.is_some() {
        conditions.push("employee_id = ?");
    }
    if query.month.is_some() {
        conditions.push("month = ?");
    }
    if query.year.is_some() {
        conditions.push("year = ?");
    }
    if query.status.is_some() {
        conditions.push("status = ?");
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM salaries {where_clause}");
    let data_sql = format!(
        "SELECT {SALARY_COLUMNS} FROM salaries {where_clause} \
         ORDER BY year DESC, month DESC, employee_id ASC LIMIT ? OFFSET ?"
    );
    debug!(sql = %data_sql, page, per_page, "Fetching salaries");

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    let mut data_query = sqlx::query_as::<_, Salary>(&data_sql);
    if let Some(employee_id) = query.employee_id {
        count_query = count_query.bind(employee_id);
        data_query = data_query.bind(employee_id);
    }
    if let Some(month) = query.month {
        count_query = count_query.bind(month);
        data_query = data_query.bind(month);
    }
    if let Some(year) = query.year {
        count_query = count_query.bind(year);
        data_query = data_query.bind(year);
    }
    if let Some(status) = query.status {
        count_query = count_query.bind(status);
        data_query = data_query.bind(status);
    }

    let total = count_query.fetch_one(pool.get_ref()).await?;
    let data = data_query
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(PaginatedSalaryResponse {
        data,
        page,
        per_page,
        total,
    }))
}

// -------------------- Adjust --------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSalary {
    #[schema(example = 12.5)]
    pub overtime_hours: Option<Decimal>,
    #[schema(example = 1250.0)]
    pub overtime_amount: Option<Decimal>,
    #[schema(example = 1000.0)]
    pub bonus: Option<Decimal>,
    #[schema(example = 300.0)]
    pub deductions: Option<Decimal>,
}

impl UpdateSalary {
    fn validate(&self) -> ApiResult<()> {
        let fields = [
            ("overtime_hours", self.overtime_hours),
            ("overtime_amount", self.overtime_amount),
            ("bonus", self.bonus),
            ("deductions", self.deductions),
        ];
        if fields.iter().all(|(_, v)| v.is_none()) {
            return Err(ApiError::validation("No fields provided for update"));
        }
        for (name, value) in fields {
            if value.is_some_and(|v| v < Decimal::ZERO) {
                return Err(ApiError::validation(format!("'{name}' must not be negative")));
            }
        }
        Ok(())
    }
}

/// Applies the changes and recomputes gross/net for an unpaid salary.
pub fn apply_salary_update(salary: &mut Salary, body: &UpdateSalary) -> ApiResult<()> {
    if salary.is_paid() {
        return Err(ApiError::conflict("Paid salaries cannot be changed"));
    }

    let overtime_amount = body.overtime_amount.unwrap_or(salary.overtime_amount);
    let bonus = body.bonus.unwrap_or(salary.bonus);
    let deductions = body.deductions.unwrap_or(salary.deductions);

    let gross = SalaryComponents {
        base_salary: salary.base_salary,
        allowances: salary.allowances,
        overtime_amount,
        bonus,
        deductions,
    }
    .checked_gross()?;

    salary.overtime_hours = body.overtime_hours.unwrap_or(salary.overtime_hours);
    salary.overtime_amount = overtime_amount;
    salary.bonus = bonus;
    salary.deductions = deductions;
    salary.gross_salary = gross;
    salary.net_salary = gross;
    Ok(())
}

#[utoipa::path(
    put,
    path = "/api/salaries/{salary_id}",
    request_body = UpdateSalary,
    params(("salary_id", description = "Salary ID")),
    responses(
        (status = 200, body = Salary),
        (status = 404, description = "Salary not found"),
        (status = 409, description = "Salary already paid")
    ),
    security(("bearer_auth" = [])),
    tag = "Salary"
)]
pub async fn update_salary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    path: web::Path<u64>,
    body: web::Json<UpdateSalary>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    body.validate()?;

    let salary_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let mut salary =
        sqlx::query_as::<_, Salary>(&format!("SELECT {SALARY_COLUMNS} FROM salaries WHERE id = ? FOR UPDATE"))
            .bind(salary_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::not_found("Salary record not found"))?;

    apply_salary_update(&mut salary, &body)?;

    sqlx::query(
        r#"
        UPDATE salaries
        SET overtime_hours = ?, overtime_amount = ?, bonus = ?, deductions = ?,
            gross_salary = ?, net_salary = ?
        WHERE id = ?
        "#,
    )
    .bind(salary.overtime_hours)
    .bind(salary.overtime_amount)
    .bind(salary.bonus)
    .bind(salary.deductions)
    .bind(salary.gross_salary)
    .bind(salary.net_salary)
    .bind(salary.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    cache.invalidate_employee(salary.employee_id);

    info!(salary_id, gross = %salary.gross_salary, "Salary adjusted");
    Ok(HttpResponse::Ok().json(salary))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> ApiResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialize response");
        ApiError::Internal
    })
}
