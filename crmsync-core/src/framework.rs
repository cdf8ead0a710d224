//! Postgres handle that store queries are processed against.
//!
//! Each query is a plain struct with a `kanau::processor::Processor`
//! implementation on [`DatabaseProcessor`], living next to the entity it reads
//! or writes.

use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
