//! Conversion between the durable record and the protocol representation.
//!
//! Both directions are pure. Decoding a corrupt JSON field or duration is a
//! `ClientDecode` error; enum values this build doesn't know are skipped.

use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::warn;

use super::entity::RegisteredClientRecord;
use super::registered_client::{
    AuthorizationGrantType, ClientAuthenticationMethod, ClientSettings, RegisteredClient,
    TokenSettings,
};
use crate::shared::error::{IdentityError, Result};

pub fn to_durable(client: &RegisteredClient) -> RegisteredClientRecord {
    let now = crate::shared::now();
    RegisteredClientRecord {
        id: client.id().to_string(),
        client_id: client.client_id().to_string(),
        client_id_issued_at: client.client_id_issued_at(),
        client_secret: client.client_secret().map(str::to_string),
        client_secret_expires_at: client.client_secret_expires_at(),
        client_name: client.client_name().to_string(),
        authentication_methods: encode_set(
            client.authentication_methods().iter().map(|m| m.as_str()),
        ),
        grant_types: encode_set(client.grant_types().iter().map(|g| g.as_str())),
        redirect_uris: encode_set(client.redirect_uris().iter().map(String::as_str)),
        post_logout_redirect_uris: encode_set(
            client.post_logout_redirect_uris().iter().map(String::as_str),
        ),
        scopes: encode_set(client.scopes().iter().map(String::as_str)),
        require_consent: client.client_settings().require_authorization_consent,
        require_pkce: client.client_settings().require_proof_key,
        access_token_ttl: format_duration(client.token_settings().access_token_time_to_live),
        refresh_token_ttl: format_duration(client.token_settings().refresh_token_time_to_live),
        created_at: now,
        updated_at: now,
    }
}

pub fn to_protocol(record: &RegisteredClientRecord) -> Result<RegisteredClient> {
    let cid = record.client_id.as_str();

    let mut builder = RegisteredClient::builder(&record.id)
        .client_id(&record.client_id)
        .client_id_issued_at(record.client_id_issued_at)
        .client_secret_expires_at(record.client_secret_expires_at)
        .client_name(&record.client_name);

    if let Some(secret) = &record.client_secret {
        builder = builder.client_secret(secret);
    }

    for value in decode_set(cid, "authenticationMethods", &record.authentication_methods)? {
        match ClientAuthenticationMethod::parse(&value) {
            Some(method) => builder = builder.authentication_method(method),
            None => warn!(client_id = cid, value = %value, "Skipping unknown client authentication method"),
        }
    }

    for value in decode_set(cid, "grantTypes", &record.grant_types)? {
        match AuthorizationGrantType::parse(&value) {
            Some(grant) => builder = builder.grant_type(grant),
            None => warn!(client_id = cid, value = %value, "Skipping unknown grant type"),
        }
    }

    for uri in decode_set(cid, "redirectUris", &record.redirect_uris)? {
        builder = builder.redirect_uri(uri);
    }
    for uri in decode_set(cid, "postLogoutRedirectUris", &record.post_logout_redirect_uris)? {
        builder = builder.post_logout_redirect_uri(uri);
    }
    for scope in decode_set(cid, "scopes", &record.scopes)? {
        builder = builder.scope(scope);
    }

    let token_settings = TokenSettings {
        access_token_time_to_live: parse_duration(&record.access_token_ttl).ok_or_else(|| {
            IdentityError::client_decode(cid, format!("invalid accessTokenTtl '{}'", record.access_token_ttl))
        })?,
        refresh_token_time_to_live: parse_duration(&record.refresh_token_ttl).ok_or_else(|| {
            IdentityError::client_decode(cid, format!("invalid refreshTokenTtl '{}'", record.refresh_token_ttl))
        })?,
    };

    Ok(builder
        .client_settings(ClientSettings {
            require_authorization_consent: record.require_consent,
            require_proof_key: record.require_pkce,
        })
        .token_settings(token_settings)
        .build_unchecked())
}

fn encode_set<'a>(values: impl Iterator<Item = &'a str>) -> String {
    Value::Array(values.map(|v| Value::String(v.to_string())).collect()).to_string()
}

fn decode_set(client_id: &str, field: &str, raw: &str) -> Result<BTreeSet<String>> {
    // Older records may leave an empty column rather than "[]"
    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    let values: Vec<String> = serde_json::from_str(raw).map_err(|e| {
        IdentityError::client_decode(client_id, format!("field {} is not a JSON string array: {}", field, e))
    })?;
    Ok(values.into_iter().collect())
}

/// Format as an ISO-8601 duration (`PT1H`, `PT5M30S`, `PT1.5S`, `PT0S`).
/// Sub-second precision is kept down to the nanosecond.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let nanos = duration.subsec_nanos();
    if total == 0 && nanos == 0 {
        return "PT0S".to_string();
    }
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{}H", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}M", minutes));
    }
    if nanos > 0 {
        let fraction = format!("{:09}", nanos);
        out.push_str(&format!("{}.{}S", seconds, fraction.trim_end_matches('0')));
    } else if seconds > 0 {
        out.push_str(&format!("{}S", seconds));
    }
    out
}

/// Parse an ISO-8601 duration with day, hour, minute and (whole or
/// fractional) second components. Years, months and weeks are rejected, as
/// are values that overflow `Duration` or carry more than nanosecond
/// precision.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let rest = value.trim().strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut secs: u64 = 0;
    let mut nanos: u32 = 0;
    let mut seen_component = false;

    if !date_part.is_empty() {
        let days: u64 = date_part.strip_suffix('D')?.parse().ok()?;
        secs = secs.checked_add(days.checked_mul(86400)?)?;
        seen_component = true;
    }

    if let Some(time) = time_part {
        let mut number = String::new();
        let mut any = false;
        for c in time.chars() {
            match c {
                '0'..='9' | '.' => number.push(c),
                'H' | 'M' => {
                    let n: u64 = number.parse().ok()?;
                    let unit = if c == 'H' { 3600 } else { 60 };
                    secs = secs.checked_add(n.checked_mul(unit)?)?;
                    number.clear();
                    any = true;
                }
                'S' => {
                    let (whole, fraction) = match number.split_once('.') {
                        Some((w, f)) => (w, f),
                        None => (number.as_str(), ""),
                    };
                    if whole.is_empty() || fraction.len() > 9 || fraction.contains('.') {
                        return None;
                    }
                    secs = secs.checked_add(whole.parse().ok()?)?;
                    if !fraction.is_empty() {
                        nanos = format!("{:0<9}", fraction).parse().ok()?;
                    }
                    number.clear();
                    any = true;
                }
                _ => return None,
            }
        }
        if !number.is_empty() || !any {
            return None;
        }
        seen_component = true;
    }

    seen_component.then(|| Duration::new(secs, nanos))
}
