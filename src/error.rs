use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

/// Ошибки ядра: поиск событий и холды инвентаря.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ticket type {ticket_type_id} does not belong to event {event_id}")]
    InvalidTicketType { event_id: Uuid, ticket_type_id: Uuid },

    #[error("insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory { requested: i32, available: i64 },

    #[error("seat {0} is already held")]
    SeatAlreadyHeld(Uuid),

    #[error("hold {0} has expired")]
    HoldExpired(Uuid),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("geocoder error: {0}")]
    Geocoder(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Ожидаемый исход конкуренции за остатки ("распродано"), а не сбой.
    pub fn is_sold_out(&self) -> bool {
        matches!(
            self,
            AppError::InsufficientInventory { .. } | AppError::SeatAlreadyHeld(_)
        )
    }

    /// Сбой хранилища или внешнего сервиса, запрос можно повторить.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Geocoder(_))
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidTicketType { .. } => "invalid_ticket_type",
            AppError::InsufficientInventory { .. } => "insufficient_inventory",
            AppError::SeatAlreadyHeld(_) => "seat_already_held",
            AppError::HoldExpired(_) => "hold_expired",
            AppError::Forbidden(_) => "forbidden",
            AppError::Unauthorized => "unauthorized",
            AppError::Database(_) => "upstream_failure",
            AppError::Geocoder(_) => "upstream_failure",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) | AppError::InvalidTicketType { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientInventory { .. } | AppError::SeatAlreadyHeld(_) => StatusCode::CONFLICT,
            AppError::HoldExpired(_) => StatusCode::GONE,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Geocoder(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("database failure: {:?}", e);
                "Сервис временно недоступен, повторите запрос".to_string()
            }
            AppError::Geocoder(e) => {
                tracing::error!("geocoder failure: {}", e);
                "Сервис временно недоступен, повторите запрос".to_string()
            }
            AppError::InsufficientInventory { .. } | AppError::SeatAlreadyHeld(_) => {
                "Недостаточно билетов: распродано".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_is_not_retryable() {
        let sold_out = AppError::InsufficientInventory { requested: 2, available: 1 };
        assert!(sold_out.is_sold_out());
        assert!(!sold_out.is_retryable());

        let seat = AppError::SeatAlreadyHeld(Uuid::new_v4());
        assert!(seat.is_sold_out());

        let db = AppError::Database(sqlx::Error::PoolTimedOut);
        assert!(db.is_retryable());
        assert!(!db.is_sold_out());
    }

    #[test]
    fn maps_to_http_status() {
        assert_eq!(AppError::InvalidInput("x".into()).into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::SeatAlreadyHeld(Uuid::nil()).into_response().status(), StatusCode::CONFLICT);
        assert_eq!(AppError::HoldExpired(Uuid::nil()).into_response().status(), StatusCode::GONE);
        assert_eq!(
            AppError::Database(sqlx::Error::PoolTimedOut).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
