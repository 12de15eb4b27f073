//! Authentication middleware for operator routes

pub mod operator;

pub use operator::operator_auth_middleware;
