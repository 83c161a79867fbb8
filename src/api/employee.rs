use crate::{
    auth::auth::AuthUser,
    error::{ApiError, ApiResult},
    model::employee::{EMPLOYEE_COLUMNS, Employee},
    utils::{
        db_utils::{ColumnKind, build_update_sql, execute_update, page_offset},
        ledger_cache::ReadCache,
    },
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

/// Columns a client may change through `PUT /employees/{id}`.
/// `advance_balance` is absent: it only moves with a ledger entry.
const UPDATABLE_COLUMNS: &[(&str, ColumnKind)] = &[
    ("employee_code", ColumnKind::Text),
    ("name", ColumnKind::Text),
    ("email", ColumnKind::Text),
    ("phone", ColumnKind::NullableText),
    ("designation", ColumnKind::NullableText),
    ("join_date", ColumnKind::Date),
    ("base_salary", ColumnKind::Money),
    ("house_rent_allowance", ColumnKind::Money),
    ("medical_allowance", ColumnKind::Money),
    ("transport_allowance", ColumnKind::Money),
    ("food_allowance", ColumnKind::Money),
    ("other_allowance", ColumnKind::Money),
    ("is_active", ColumnKind::Bool),
];

/// Short employee view embedded in salary and advance responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmployeeSummary {
    pub id: u64,
    pub employee_code: String,
    pub name: String,
    pub designation: Option<String>,
    pub advance_balance: Decimal,
}

impl From<&Employee> for EmployeeSummary {
    fn from(e: &Employee) -> Self {
        Self {
            id: e.id,
            employee_code: e.employee_code.clone(),
            name: e.name.clone(),
            designation: e.designation.clone(),
            advance_balance: e.advance_balance,
        }
    }
}

pub async fn fetch_employee(pool: &MySqlPool, employee_id: u64) -> ApiResult<Employee> {
    sqlx::query_as::<_, Employee>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?"
    ))
    .bind(employee_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Employee not found"))
}

/// Loads the employee row and holds its lock until the transaction ends.
/// Every balance change goes through here first.
pub async fn lock_employee(tx: &mut Transaction<'_, MySql>, employee_id: u64) -> ApiResult<Employee> {
    sqlx::query_as::<_, Employee>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ? FOR UPDATE"
    ))
    .bind(employee_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Employee not found"))
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateEmployee {
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    #[schema(example = "Rahim Uddin")]
    pub name: String,
    #[schema(example = "rahim@company.com", format = "email")]
    pub email: String,
    #[schema(example = "+8801712345678")]
    pub phone: Option<String>,
    #[schema(example = "Machine Operator")]
    pub designation: Option<String>,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub join_date: NaiveDate,
    #[schema(example = 15000.0)]
    pub base_salary: Decimal,
    #[serde(default)]
    pub house_rent_allowance: Decimal,
    #[serde(default)]
    pub medical_allowance: Decimal,
    #[serde(default)]
    pub transport_allowance: Decimal,
    #[serde(default)]
    pub food_allowance: Decimal,
    #[serde(default)]
    pub other_allowance: Decimal,
}

impl CreateEmployee {
    fn validate(&self) -> ApiResult<()> {
        for (field, value) in [
            ("employee_code", &self.employee_code),
            ("name", &self.name),
            ("email", &self.email),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::validation(format!("'{field}' is required")));
            }
        }
        if !self.email.contains('@') {
            return Err(ApiError::validation("Invalid email address"));
        }

        let amounts = [
            ("base_salary", self.base_salary),
            ("house_rent_allowance", self.house_rent_allowance),
            ("medical_allowance", self.medical_allowance),
            ("transport_allowance", self.transport_allowance),
            ("food_allowance", self.food_allowance),
            ("other_allowance", self.other_allowance),
        ];
        match amounts.iter().find(|(_, v)| *v < Decimal::ZERO) {
            Some((field, _)) => Err(ApiError::validation(format!("'{field}' must not be negative"))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EmployeeQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub is_active: Option<bool>,
    /// Matches name, email or employee code
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct EmployeeListResponse {
    pub data: Vec<Employee>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 42)]
    pub total: i64,
}

/// Create Employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Employee code or email already in use", body = Object, example = json!({
            "message": "Employee code or email already exists"
        }))
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    payload: web::Json<CreateEmployee>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    payload.validate()?;

    let result = sqlx::query(
        r#"
        INSERT INTO employees
        (employee_code, name, email, phone, designation, join_date, base_salary,
         house_rent_allowance, medical_allowance, transport_allowance, food_allowance,
         other_allowance, advance_balance, is_active)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, TRUE)
        "#,
    )
    .bind(payload.employee_code.trim())
    .bind(payload.name.trim())
    .bind(payload.email.trim())
    .bind(&payload.phone)
    .bind(&payload.designation)
    .bind(payload.join_date)
    .bind(payload.base_salary)
    .bind(payload.house_rent_allowance)
    .bind(payload.medical_allowance)
    .bind(payload.transport_allowance)
    .bind(payload.food_allowance)
    .bind(payload.other_allowance)
    .execute(pool.get_ref())
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::conflict("Employee code or email already exists"),
        other => other,
    })?;

    let employee = fetch_employee(pool.get_ref(), result.last_insert_id()).await?;
    cache.invalidate_employee(employee.id);

    info!(employee_id = employee.id, code = %employee.employee_code, "Employee created");
    Ok(HttpResponse::Created().json(employee))
}

// -------------------- Handler --------------------

#[utoipa::path(
    get,
    path = "/api/employees",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Paginated employee list", body = EmployeeListResponse)
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_employees(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EmployeeQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = page_offset(page, per_page);

    // ---------- build WHERE clause dynamically ----------
    let mut conditions = Vec::new();
    if query.is_active.is_some() {
        conditions.push("is_active = ?");
    }
    let like = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));
    if like.is_some() {
        conditions.push("(name LIKE ? OR email LIKE ? OR employee_code LIKE ?)");
    }

    let where_clause = if conditions.is_empty() {
        "".to_string()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    // ---------- total count ----------
    let count_sql = format!("SELECT COUNT(*) as total FROM employees {}", where_clause);
    let data_sql = format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees {} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );
    debug!(sql = %data_sql, page, per_page, offset, "Fetching employees");

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    let mut data_query = sqlx::query_as::<_, Employee>(&data_sql);
    if let Some(is_active) = query.is_active {
        count_query = count_query.bind(is_active);
        data_query = data_query.bind(is_active);
    }
    if let Some(like) = &like {
        for _ in 0..3 {
            count_query = count_query.bind(like.clone());
            data_query = data_query.bind(like.clone());
        }
    }

    let total = count_query.fetch_one(pool.get_ref()).await?;
    let employees = data_query
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(EmployeeListResponse {
        data: employees,
        page,
        per_page,
        total,
    }))
}

/// Update Employee
#[utoipa::path(
    put,
    path = "/api/employees/{employee_id}",
    params(
        ("employee_id", Path, description = "Employee ID")
    ),
    request_body(content = Object, description = "Any subset of the updatable employee columns", example = json!({
        "designation": "Line Supervisor",
        "base_salary": 18000.0
    })),
    responses(
        (status = 200, description = "Employee updated", body = Employee),
        (status = 400, description = "Unknown or read-only field", body = Object, example = json!({
            "message": "Field 'advance_balance' cannot be updated"
        })),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "message": "Employee not found"
        }))
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    path: web::Path<u64>,
    body: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    let employee_id = path.into_inner();

    let update = build_update_sql("employees", &body, UPDATABLE_COLUMNS, "id", employee_id)?;
    debug!(sql = %update.sql, employee_id, "Updating employee");

    execute_update(pool.get_ref(), update).await?;

    // MySQL reports 0 affected rows for a no-op update, so re-read instead
    let employee = fetch_employee(pool.get_ref(), employee_id).await?;
    cache.invalidate_employee(employee_id);

    info!(employee_id, "Employee updated");
    Ok(HttpResponse::Ok().json(employee))
}

/// Deactivate Employee
///
/// Rows are never removed: salaries, payments and ledger entries keep
/// pointing at the employee.
#[utoipa::path(
    delete,
    path = "/api/employees/{employee_id}",
    params(
        ("employee_id", Path, description = "Employee ID")
    ),
    responses(
        (status = 200, description = "Employee deactivated", body = Object, example = json!({
            "message": "Employee deactivated"
        })),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "message": "Employee not found"
        }))
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<ReadCache>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_hr_or_admin()?;
    let employee_id = path.into_inner();

    let employee = fetch_employee(pool.get_ref(), employee_id).await?;
    if employee.is_active {
        sqlx::query("UPDATE employees SET is_active = FALSE WHERE id = ?")
            .bind(employee_id)
            .execute(pool.get_ref())
            .await?;
        cache.invalidate_employee(employee_id);
        info!(employee_id, "Employee deactivated");
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Employee deactivated"
    })))
}

/// Get Employee by ID
#[utoipa::path(
    get,
    path = "/api/employees/{employee_id}",
    params(
        ("employee_id", Path, description = "Employee ID")
    ),
    responses(
        (status = 200, description = "Employee found", body = Employee),
        (status = 403, description = "Employees may only read their own record"),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "message": "Employee not found"
        }))
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let employee_id = path.into_inner();
    auth.require_access_to(employee_id)?;

    let employee = fetch_employee(pool.get_ref(), employee_id).await?;
    Ok(HttpResponse::Ok().json(employee))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use crate::test_support::{bearer_for, lazy_pool, test_config};
    use actix_web::{App, http::StatusCode, test as atest};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn new_employee() -> CreateEmployee {
        CreateEmployee {
            employee_code: "EMP-010".into(),
            name: "Karim".into(),
            email: "karim@company.com".into(),
            phone: None,
            designation: None,
            join_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            base_salary: dec!(15000),
            house_rent_allowance: dec!(3000),
            medical_allowance: dec!(0),
            transport_allowance: dec!(0),
            food_allowance: dec!(0),
            other_allowance: dec!(0),
        }
    }

    #[test]
    fn create_validation() {
        assert!(new_employee().validate().is_ok());

        let mut e = new_employee();
        e.name = "  ".into();
        assert_eq!(e.validate(), Err(ApiError::validation("'name' is required")));

        let mut e = new_employee();
        e.food_allowance = dec!(-1);
        assert_eq!(
            e.validate(),
            Err(ApiError::validation("'food_allowance' must not be negative"))
        );

        let mut e = new_employee();
        e.email = "karim".into();
        assert!(e.validate().is_err());
    }

    #[test]
    fn advance_balance_is_not_updatable() {
        assert!(!UPDATABLE_COLUMNS.iter().any(|(c, _)| *c == "advance_balance"));
        assert!(!UPDATABLE_COLUMNS.iter().any(|(c, _)| *c == "id"));
    }

    macro_rules! app {
        () => {
            atest::init_service(
                App::new()
                    .app_data(web::Data::new(lazy_pool()))
                    .app_data(web::Data::new(test_config()))
                    .app_data(web::Data::new(ReadCache::new(Duration::from_secs(60))))
                    .route("/employees", web::get().to(list_employees))
                    .route("/employees/{id}", web::get().to(get_employee))
                    .route("/employees/{id}", web::put().to(update_employee)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn writing_advance_balance_directly_is_rejected() {
        let app = app!();
        let req = atest::TestRequest::put()
            .uri("/employees/1")
            .insert_header(bearer_for(Role::Admin, None))
            .set_json(json!({"advance_balance": 0}))
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn employees_cannot_list_or_read_others() {
        let app = app!();

        let req = atest::TestRequest::get()
            .uri("/employees")
            .insert_header(bearer_for(Role::Employee, Some(3)))
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = atest::TestRequest::get()
            .uri("/employees/4")
            .insert_header(bearer_for(Role::Employee, Some(3)))
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn missing_token_is_unauthorized() {
        let app = app!();
        let req = atest::TestRequest::get().uri("/employees").to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
