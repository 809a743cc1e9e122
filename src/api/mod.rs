pub mod dto;
pub mod error;
pub mod rate_limiter;
pub mod routes;
pub mod whatsapp;
