use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::model::payment::{PAYMENT_COLUMNS, Payment};
use crate::model::role::Role;
use crate::utils::db_utils::page_offset;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaymentQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub employee_id: Option<u64>,
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedPaymentResponse {
    pub data: Vec<Payment>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

/// Employees only ever see their own payments, whatever they ask for.
fn effective_employee_filter(auth: &AuthUser, requested: Option<u64>) -> ApiResult<Option<u64>> {
    if auth.role != Role::Employee {
        return Ok(requested);
    }
    let own = auth
        .employee_id
        .ok_or_else(|| ApiError::Forbidden("Login is not linked to an employee".into()))?;
    if let Some(id) = requested {
        auth.require_access_to(id)?;
    }
    Ok(Some(own))
}

#[utoipa::path(
    get,
    path = "/api/payments",
    params(PaymentQuery),
    responses((status = 200, body = PaginatedPaymentResponse)),
    security(("bearer_auth" = [])),
    tag = "Payment"
)]
pub async fn list_payments(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PaymentQuery>,
) -> ApiResult<HttpResponse> {
    let employee_id = effective_employee_filter(&auth, query.employee_id)?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = page_offset(page, per_page);

    let where_clause = if employee_id.is_some() {
        "WHERE employee_id = ?"
    } else {
        ""
    };

    let count_sql = format!("SELECT COUNT(*) FROM payments {where_clause}");
    let data_sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments {where_clause} \
         ORDER BY paid_date DESC, id DESC LIMIT ? OFFSET ?"
    );
    debug!(sql = %data_sql, page, per_page, "Fetching payments");

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    let mut data_query = sqlx::query_as::<_, Payment>(&data_sql);
    if let Some(id) = employee_id {
        count_query = count_query.bind(id);
        data_query = data_query.bind(id);
    }

    let total = count_query.fetch_one(pool.get_ref()).await?;
    let data = data_query
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(PaginatedPaymentResponse {
        data,
        page,
        per_page,
        total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, employee_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 1,
            username: "u".into(),
            role,
            employee_id,
        }
    }

    #[test]
    fn staff_filter_passes_through() {
        assert_eq!(effective_employee_filter(&user(Role::Hr, None), None), Ok(None));
        assert_eq!(effective_employee_filter(&user(Role::Admin, None), Some(5)), Ok(Some(5)));
    }

    #[test]
    fn employees_are_pinned_to_themselves() {
        let me = user(Role::Employee, Some(3));
        assert_eq!(effective_employee_filter(&me, None), Ok(Some(3)));
        assert_eq!(effective_employee_filter(&me, Some(3)), Ok(Some(3)));
        assert!(matches!(effective_employee_filter(&me, Some(4)), Err(ApiError::Forbidden(_))));

        let unlinked = user(Role::Employee, None);
        assert!(effective_employee_filter(&unlinked, None).is_err());
    }
}
