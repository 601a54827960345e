//! Reserved-address default handlers
//!
//! `/info`, `/subscribe`, and `/unsubscribe` plus a no-match default
//! handler are a convention layered on top of the dispatcher, not core
//! wire semantics. A server opts in by calling
//! [`add_default_handlers`]; subscription requests then mutate the shared
//! [`MultiClient`] target table, which the embedding server may use to
//! forward traffic to its subscribers.
//!
//! | Address        | Behavior                                           |
//! |----------------|----------------------------------------------------|
//! | `/info info`   | reply: server description                          |
//! | `/info list`   | reply: registered address patterns                 |
//! | `/info clients`| reply: subscribed target spec strings              |
//! | `/subscribe`   | add a target (first string arg, or the source)     |
//! | `/unsubscribe` | remove a target (first string arg, or the source)  |
//! | anything else  | default handler: error reply "no handler"          |
//!
//! Replies go under the space's info prefix (errors under its error
//! prefix); with no info prefix configured the replies are addressed to
//! `/info` itself.

use crate::dispatch::AddressSpace;
use crate::error::{Error, Result};
use crate::proto::Message;
use crate::transport::target::{MultiClient, Target};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

/// Register the conventional `/info`, `/subscribe`, `/unsubscribe`, and
/// default handlers on `space`
///
/// `description` is returned by `/info info`. Subscriptions mutate
/// `subscribers`' target table; `default_port` fills in for target specs
/// that omit one.
pub fn add_default_handlers(
    space: &Arc<AddressSpace>,
    subscribers: Arc<MultiClient>,
    description: String,
    default_port: u16,
) -> Result<()> {
    // The handlers need the space they live in; a weak reference avoids
    // a handler→space→handler cycle
    let weak: Weak<AddressSpace> = Arc::downgrade(space);

    space.set_default(move |msg: &Message, _source| {
        Err(Error::NoSuchHandler(msg.addr().to_string()))
    });

    {
        let weak = weak.clone();
        let subscribers = Arc::clone(&subscribers);
        space.register("/info", move |msg, source| {
            info_handler(&weak, &subscribers, &description, msg, source)
        })?;
    }

    {
        let weak = weak.clone();
        let subscribers = Arc::clone(&subscribers);
        space.register("/subscribe", move |msg, source| {
            let target = requested_target(msg, source, default_port)?;
            log::info!("subscribing {}", target.url_str());
            subscribers.set_target(target);
            reply_to(&weak, "subscribed", source)
        })?;
    }

    space.register("/unsubscribe", move |msg, source| {
        let target = requested_target(msg, source, default_port)?;
        log::info!("unsubscribing {}", target.addr);
        subscribers.del_target(&target.addr)?;
        reply_to(&weak, "unsubscribed", source)
    })?;

    Ok(())
}

/// Resolve the target a subscribe/unsubscribe request is about: the first
/// string argument as a target spec, or the request's source address
fn requested_target(msg: &Message, source: SocketAddr, default_port: u16) -> Result<Target> {
    match msg.args().first().and_then(|a| a.as_str()) {
        Some(spec) => Target::parse(spec, default_port),
        None => Ok(Target {
            addr: source,
            prefix: String::new(),
            filters: Vec::new(),
        }),
    }
}

fn info_handler(
    weak: &Weak<AddressSpace>,
    subscribers: &Arc<MultiClient>,
    description: &str,
    msg: &Message,
    _source: SocketAddr,
) -> Result<Option<Message>> {
    let Some(space) = weak.upgrade() else {
        return Ok(None);
    };
    let command = msg
        .args()
        .first()
        .and_then(|a| a.as_str())
        .unwrap_or("info");

    let mut reply = Message::new(&info_addr(&space))?;
    match command {
        "info" => reply.push(description),
        "list" => {
            for addr in space.addresses() {
                reply.push(addr);
            }
        }
        "clients" => {
            for spec in subscribers.target_strings() {
                reply.push(spec);
            }
        }
        other => {
            return Err(Error::Handler {
                addr: msg.addr().to_string(),
                reason: format!("unknown info command {:?}", other),
            })
        }
    }
    Ok(Some(reply))
}

fn reply_to(weak: &Weak<AddressSpace>, what: &str, source: SocketAddr) -> Result<Option<Message>> {
    let Some(space) = weak.upgrade() else {
        return Ok(None);
    };
    let mut reply = Message::new(&info_addr(&space))?;
    reply.push(format!("{} {}", what, source));
    Ok(Some(reply))
}

fn info_addr(space: &AddressSpace) -> String {
    let prefix = space.info_prefix();
    if prefix.is_empty() {
        "/info".to_string()
    } else {
        prefix
    }
}
