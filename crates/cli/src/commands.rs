use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use sipsimple::core::transport::UdpTransport;
use sipsimple::core::{Method, NotificationCenter};
use sipsimple::{
    Message, Notification, NotificationKind, Publication, Registration, Route, SenderId, SimpleConfig, SipCore,
    SipUri, Timestamp, TransportKind,
};

async fn build_core(config: &SimpleConfig) -> Result<SipCore> {
    let transport = UdpTransport::bind(config.sip.local_address)
        .await
        .with_context(|| format!("Failed to bind UDP transport on {}", config.sip.local_address))?;
    Ok(SipCore::with_settings(
        Arc::new(transport),
        Arc::new(NotificationCenter::new()),
        config.core_settings(),
    ))
}

/// Address the route would see us from, for the Contact header
fn contact_address(route: &Route, bound: SocketAddr) -> Result<SocketAddr> {
    if !bound.ip().is_unspecified() {
        return Ok(bound);
    }
    let probe = StdUdpSocket::bind("0.0.0.0:0").context("Failed to open probe socket")?;
    probe
        .connect(route.socket_addr())
        .with_context(|| format!("No local address reaches {}", route.socket_addr()))?;
    let ip: IpAddr = probe.local_addr()?.ip();
    Ok(SocketAddr::new(ip, bound.port()))
}

fn print_notification(notification: &Notification) {
    match serde_json::to_string(notification) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Cannot serialize {}: {}", notification.name(), e),
    }
}

/// Next notification posted by `sender`; every one is printed
async fn next_from(events: &mut broadcast::Receiver<Notification>, sender: SenderId) -> Result<Notification> {
    loop {
        match events.recv().await {
            Ok(notification) if notification.sender == sender => {
                print_notification(&notification);
                return Ok(notification);
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => warn!("Missed {} notifications", skipped),
            Err(RecvError::Closed) => bail!("Notification center closed"),
        }
    }
}

fn account_uri(config: &SimpleConfig) -> Result<SipUri> {
    config.validate()?;
    config
        .account
        .uri
        .clone()
        .ok_or_else(|| anyhow!("An account URI is required (--account or [account] uri)"))
}

pub async fn register(config: &SimpleConfig, duration: Option<u32>, once: bool) -> Result<()> {
    let uri = account_uri(config)?;
    let route = config.route()?;
    let core = build_core(config).await?;
    let local = contact_address(&route, core.transport().local_addr()?)?;
    let mut contact = SipUri::new(local.ip().to_string()).with_port(local.port());
    if let Some(user) = &uri.user {
        contact = contact.with_user(user.clone());
    }

    let mut events = core.notification_center().subscribe();
    let registration = Registration::new(
        &core,
        uri,
        config.credentials(),
        duration.unwrap_or(config.sip.register_duration),
    );
    registration.register(contact.clone(), route.clone(), None)?;
    info!("Registering {} via {}", contact, route);

    let mut ending = false;
    loop {
        let notification = tokio::select! {
            notification = next_from(&mut events, registration.id()) => notification?,
            _ = tokio::signal::ctrl_c(), if !ending => {
                if !registration.is_registered() {
                    return Ok(());
                }
                ending = true;
                registration.end(None)?;
                continue;
            }
        };
        match notification.kind {
            NotificationKind::RegistrationDidSucceed { .. } if once && !ending => {
                ending = true;
                registration.end(None)?;
            }
            NotificationKind::RegistrationWillExpire { .. } if !ending => {
                registration.register(contact.clone(), route.clone(), None)?;
            }
            NotificationKind::RegistrationDidEnd { expired: true } if !ending => {
                registration.register(contact.clone(), route.clone(), None)?;
            }
            NotificationKind::RegistrationDidEnd { .. } => return Ok(()),
            NotificationKind::RegistrationDidFail { code, reason, .. } => {
                bail!("Registration failed: {} {}", code, reason)
            }
            NotificationKind::RegistrationDidNotEnd { code, reason } => {
                bail!("Unregistration failed: {} {}", code, reason)
            }
            _ => {}
        }
    }
}

pub async fn message(config: &SimpleConfig, to: SipUri, text: String, content_type: String) -> Result<()> {
    let from = account_uri(config)?;
    let route = config.route()?;
    let core = build_core(config).await?;

    let mut events = core.notification_center().subscribe();
    let message = Message::new(&core, from, to, route, content_type, text, config.credentials());
    message.send(None)?;
    info!("{} sent to {}", Method::Message, message.to_uri());

    loop {
        match next_from(&mut events, message.id()).await?.kind {
            NotificationKind::MessageDidSucceed {} => return Ok(()),
            NotificationKind::MessageDidFail { code, reason } => bail!("Message failed: {} {}", code, reason),
            _ => {}
        }
    }
}

pub async fn publish(
    config: &SimpleConfig,
    event: String,
    content_type: String,
    body_file: PathBuf,
    duration: Option<u32>,
    once: bool,
) -> Result<()> {
    let uri = account_uri(config)?;
    let route = config.route()?;
    let body = tokio::fs::read(&body_file)
        .await
        .with_context(|| format!("Failed to read {}", body_file.display()))?;
    let core = build_core(config).await?;

    let mut events = core.notification_center().subscribe();
    let publication = Publication::new(
        &core,
        uri,
        event,
        content_type,
        config.credentials(),
        duration.unwrap_or(config.sip.publish_duration),
    );
    publication.publish(Some(body.into()), route.clone(), None)?;

    let mut ending = false;
    loop {
        let notification = tokio::select! {
            notification = next_from(&mut events, publication.id()) => notification?,
            _ = tokio::signal::ctrl_c(), if !ending => {
                if !publication.is_published() {
                    return Ok(());
                }
                ending = true;
                publication.end(None)?;
                continue;
            }
        };
        match notification.kind {
            NotificationKind::PublicationDidSucceed { .. } if once && !ending => {
                ending = true;
                publication.end(None)?;
            }
            NotificationKind::PublicationWillExpire { .. } if !ending => {
                publication.publish(None, route.clone(), None)?;
            }
            NotificationKind::PublicationDidEnd { .. } => return Ok(()),
            NotificationKind::PublicationDidFail { code, reason, .. } => {
                bail!("Publication failed: {} {}", code, reason)
            }
            NotificationKind::PublicationDidNotEnd { code, reason } => {
                bail!("Unpublication failed: {} {}", code, reason)
            }
            _ => {}
        }
    }
}

pub fn route(address: &str, port: Option<u16>, transport: TransportKind) -> Result<()> {
    let mut route = Route::new(address)?.with_transport(transport);
    if let Some(port) = port {
        route = route.with_port(port)?;
    }
    let output = json!({
        "route": route.to_string(),
        "uri": route.uri().to_string(),
        "address": route.socket_addr().to_string(),
        "transport": route.transport(),
    });
    println!("{}", output);
    Ok(())
}

pub fn timestamp(value: Option<&str>) -> Result<()> {
    let stamp = match value {
        Some(value) => Timestamp::parse(value)?,
        None => Timestamp::now(),
    };
    let output = json!({
        "local": stamp.format(),
        "utc": stamp.format_with_offset(0),
        "utc_offset_minutes": Timestamp::utc_offset(),
    });
    println!("{}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_address_keeps_explicit_binding() {
        let route = Route::new("127.0.0.1").unwrap();
        let bound: SocketAddr = "127.0.0.1:5070".parse().unwrap();
        assert_eq!(contact_address(&route, bound).unwrap(), bound);

        let resolved = contact_address(&route, "0.0.0.0:5071".parse().unwrap()).unwrap();
        assert!(resolved.ip().is_loopback());
        assert_eq!(resolved.port(), 5071);
    }

    #[test]
    fn offline_commands() {
        assert!(route("10.0.0.1", Some(5080), TransportKind::Tcp).is_ok());
        assert!(route("example.com", None, TransportKind::Udp).is_err());
        assert!(timestamp(Some("2009-01-01T00:00:00Z")).is_ok());
        assert!(timestamp(Some("yesterday")).is_err());
        assert!(timestamp(None).is_ok());
    }

    #[test]
    fn network_commands_require_an_account() {
        assert!(account_uri(&SimpleConfig::default()).is_err());
    }
}
