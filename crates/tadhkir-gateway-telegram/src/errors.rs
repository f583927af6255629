//! Mapping of teloxide errors onto gateway protocol errors.

use std::time::Duration;

use tadhkir_gateway_protocol::{DeliveryError, GatewayError, error_codes};
use teloxide::{ApiError, RequestError};

/// Map a failed Bot API call made by the poll loop.
pub fn gateway_error(err: RequestError) -> GatewayError {
    match err {
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => GatewayError::conflict(
            ApiError::TerminatedByOtherGetUpdates.to_string(),
        ),
        RequestError::Api(ApiError::InvalidToken) => {
            GatewayError::api(error_codes::UNAUTHORIZED, ApiError::InvalidToken.to_string())
        }
        RequestError::Api(api) => GatewayError::api(400, api.to_string()),
        RequestError::RetryAfter(secs) => GatewayError::api(
            error_codes::TOO_MANY_REQUESTS,
            format!("retry after {}s", secs.seconds()),
        ),
        other => GatewayError::Transport(other.to_string()),
    }
}

/// Wait before the next poll after `err`: never less than `base`, and at
/// least as long as Telegram asked for on flood control.
pub(crate) fn retry_delay(err: &RequestError, base: Duration) -> Duration {
    match err {
        RequestError::RetryAfter(secs) => {
            base.max(Duration::from_secs(u64::from(secs.seconds())))
        }
        _ => base,
    }
}

/// Map a failed `sendMessage` call.
///
/// Recipients that blocked the bot, removed it, or no longer exist are
/// reported as unreachable; everything else is worth retrying next time.
pub fn delivery_error(err: RequestError) -> DeliveryError {
    match err {
        RequestError::Api(
            api @ (ApiError::BotBlocked
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::UserDeactivated
            | ApiError::CantInitiateConversation
            | ApiError::ChatNotFound),
        ) => DeliveryError::Unreachable(api.to_string()),
        other => DeliveryError::Other(other.to_string()),
    }
}
