//! Local process identity used by the EXTERNAL and DBUS_COOKIE_SHA1 mechanisms.

use busauth_core::{AuthError, AuthResult};

/// Effective user id of the calling process.
#[cfg(unix)]
pub fn effective_uid() -> AuthResult<u32> {
    Ok(nix::unistd::geteuid().as_raw())
}

#[cfg(not(unix))]
pub fn effective_uid() -> AuthResult<u32> {
    Err(AuthError::AuthenticationFailed(
        "no numeric user id on this platform".into(),
    ))
}

/// Login name of the calling process.
///
/// Resolved from the password database for the effective uid, falling back to
/// `$LOGNAME` and then `$USER`.
pub fn login_name() -> AuthResult<String> {
    #[cfg(unix)]
    {
        use nix::unistd::{geteuid, User};

        match User::from_uid(geteuid()) {
            Ok(Some(user)) if !user.name.is_empty() => return Ok(user.name),
            Ok(_) => tracing::debug!("no passwd entry for effective uid"),
            Err(e) => tracing::debug!("passwd lookup failed: {}", e),
        }
    }

    ["LOGNAME", "USER"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.is_empty())
        .ok_or_else(|| AuthError::AuthenticationFailed("cannot determine login name".into()))
}
