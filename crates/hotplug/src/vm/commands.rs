//! Typed QMP command helpers
//!
//! Thin wrappers that build the [`Command`] and decode the reply payload,
//! so callers never handle raw JSON.

use super::ControlChannel;
use crate::error::Result;
use protocol::{Command, ProtocolError, QomProperty, StatusInfo};
use serde::de::DeserializeOwned;
use serde_json::Value;

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(ProtocolError::from)
        .map_err(Into::into)
}

/// Liveness probe
pub async fn query_status<C: ControlChannel>(channel: &mut C) -> Result<StatusInfo> {
    decode(channel.execute(Command::query_status()).await?)
}

/// Hot-plug the host device at `hostbus`/`hostport` under identifier `id`
pub async fn device_add<C: ControlChannel>(
    channel: &mut C,
    id: &str,
    hostbus: &str,
    hostport: &str,
) -> Result<()> {
    channel
        .execute(Command::device_add_usb_host(id, hostbus, hostport))
        .await?;
    Ok(())
}

/// Hot-unplug the device with identifier `id`
pub async fn device_del<C: ControlChannel>(channel: &mut C, id: &str) -> Result<()> {
    channel.execute(Command::device_del(id)).await?;
    Ok(())
}

/// List the properties (children and links included) of a QOM path
pub async fn qom_list<C: ControlChannel>(channel: &mut C, path: &str) -> Result<Vec<QomProperty>> {
    decode(channel.execute(Command::qom_list(path)).await?)
}

/// Read one property of a QOM object
pub async fn qom_get<C, T>(channel: &mut C, path: &str, property: &str) -> Result<T>
where
    C: ControlChannel,
    T: DeserializeOwned,
{
    decode(channel.execute(Command::qom_get(path, property)).await?)
}
