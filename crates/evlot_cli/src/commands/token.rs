//! Token command implementation.

use evlot_model::{Timestamp, UserId};
use evlot_sync::{AuthConfig, Session, TokenIssuer};
use std::time::Duration;

/// Runs the token command.
pub fn run(secret: &str, user: &str, hours: u64) -> Result<(), Box<dyn std::error::Error>> {
    let session = execute(secret, user, hours, Timestamp::now())?;
    println!("User:    {}", session.user_id);
    println!("Expires: {}", session.expires_at);
    println!("Token:   {}", session.token);
    Ok(())
}

/// Issues a session for `user` valid for `hours` from `now`.
pub fn execute(
    secret: &str,
    user: &str,
    hours: u64,
    now: Timestamp,
) -> Result<Session, Box<dyn std::error::Error>> {
    if secret.is_empty() {
        return Err("secret must not be empty".into());
    }
    let config = AuthConfig::new(secret.as_bytes().to_vec())
        .with_expiry(Duration::from_secs(hours.saturating_mul(3600)));
    Ok(TokenIssuer::new(config).issue(&UserId::new(user), now)?)
}
