pub mod advance;
pub mod employee;
pub mod payment;
pub mod salary;
