pub mod bills;
pub mod property;

use crate::error::AppError;

const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn map_db_error(error: sqlx::Error) -> AppError {
    if is_unique_violation(&error) {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    tracing::error!(db_error = %error, "Database query failed");
    AppError::Dependency("Database operation failed.".to_string())
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::{is_unique_violation, map_db_error};
    use crate::error::AppError;

    #[derive(Debug, thiserror::Error)]
    #[error("{message}")]
    struct PgFailure {
        code: &'static str,
        message: &'static str,
    }

    impl DatabaseError for PgFailure {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            if self.code == "23505" {
                ErrorKind::UniqueViolation
            } else {
                ErrorKind::Other
            }
        }
    }

    fn pg_error(code: &'static str, message: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(PgFailure { code, message }))
    }

    #[test]
    fn duplicate_room_month_is_a_unique_violation() {
        let duplicate = pg_error(
            "23505",
            "duplicate key value violates unique constraint \"bills_room_month_key\"",
        );
        assert!(is_unique_violation(&duplicate));
        assert!(matches!(map_db_error(duplicate), AppError::Conflict(_)));
    }

    #[test]
    fn other_failures_are_not_duplicates() {
        let overflow = pg_error("22003", "numeric field overflow");
        assert!(!is_unique_violation(&overflow));
        assert!(matches!(map_db_error(overflow), AppError::Dependency(_)));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }
}
