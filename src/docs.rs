use crate::api::advance::{
    AdvanceHistoryEntry, AdvanceHistoryResponse, AdvanceMovementResponse, AdvanceOverviewEntry,
    AdvanceOverviewResponse, AdvanceRequest,
};
use crate::api::employee::{CreateEmployee, EmployeeListResponse, EmployeeSummary};
use crate::api::payment::PaginatedPaymentResponse;
use crate::api::salary::{
    AdvanceDeductionResult, GenerateSalariesRequest, GenerateSalariesResponse,
    PaginatedSalaryResponse, PaySalaryRequest, PaySalaryResponse, SalaryBreakdown, SalaryPreview,
    UpdateSalary,
};
use crate::model::advance::{AdvanceRecord, AdvanceType};
use crate::model::employee::Employee;
use crate::model::payment::{Payment, PaymentMethod};
use crate::model::salary::{Salary, SalaryStatus};
use crate::models::{LoginReqDto, TokenPair, UserReq};
use crate::payroll::generation::GenerationSummary;
use crate::payroll::ledger::{LedgerMismatch, Reconciliation};
use crate::payroll::overview::OverviewSummary;
use crate::payroll::settlement::AdvanceInfo;
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Salary Ledger API",
        version = "1.0.0",
        description = r#"
## Salary & Advance Settlement

Backend for the salary/advance workflow of a small company dashboard.

### 🔹 Key Features
- **Salaries**
  - Generate monthly salaries, adjust unpaid ones, preview and pay them
- **Advances**
  - Give, recover and adjust advances; every movement is an immutable ledger entry
  - Per-employee history and a company-wide overview of outstanding balances
- **Employees & Payments**
  - Employee records with compensation, payment history

### 🔐 Security
Endpoints under the API prefix need a **JWT Bearer** access token.
Money movements are limited to **Admin** and **HR**; ledger adjustments to **Admin**.

### 🔁 Retries
Pay and advance endpoints accept an `Idempotency-Key` header; a repeated key
replays the first successful response instead of moving money twice.

### 💰 Amounts
Amounts are BDT decimals with two fractional digits.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::register,

        crate::api::employee::create_employee,
        crate::api::employee::get_employee,
        crate::api::employee::list_employees,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,

        crate::api::salary::salary_preview,
        crate::api::salary::pay_salary,
        crate::api::salary::generate_monthly_salaries,
        crate::api::salary::list_salaries,
        crate::api::salary::update_salary,

        crate::api::advance::give,
        crate::api::advance::recover,
        crate::api::advance::adjust,
        crate::api::advance::history,
        crate::api::advance::overview,
        crate::api::advance::reconcile_ledger,

        crate::api::payment::list_payments
    ),
    components(
        schemas(
            UserReq,
            LoginReqDto,
            TokenPair,
            Employee,
            EmployeeSummary,
            CreateEmployee,
            EmployeeListResponse,
            Salary,
            SalaryStatus,
            SalaryBreakdown,
            SalaryPreview,
            AdvanceInfo,
            PaySalaryRequest,
            PaySalaryResponse,
            AdvanceDeductionResult,
            GenerateSalariesRequest,
            GenerateSalariesResponse,
            GenerationSummary,
            PaginatedSalaryResponse,
            UpdateSalary,
            Payment,
            PaymentMethod,
            PaginatedPaymentResponse,
            AdvanceRecord,
            AdvanceType,
            AdvanceRequest,
            AdvanceMovementResponse,
            AdvanceHistoryEntry,
            AdvanceHistoryResponse,
            AdvanceOverviewEntry,
            AdvanceOverviewResponse,
            OverviewSummary,
            Reconciliation,
            LedgerMismatch
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, token refresh and user accounts"),
        (name = "Employee", description = "Employee management APIs"),
        (name = "Salary", description = "Monthly salary generation, preview and payment"),
        (name = "Advance", description = "Advance ledger APIs"),
        (name = "Payment", description = "Salary payment records"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
