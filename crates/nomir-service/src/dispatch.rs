//! Server side of a request: decode, authenticate, perform, reply.
//!
//! Runs on worker stacks. The only runtime locks taken here are the short
//! ones inside table and cache accesses; the dispatched operation itself,
//! which may be arbitrary user code, executes with nothing held.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use nomir_common::auth::Target;
use nomir_common::codec;
use nomir_common::frame::{self, Header, WIRE_VERSION};
use nomir_common::{Dict, Handle, NomirError, Opcode, Result, Value};

use crate::service::{Job, PeerRefCodec, ServiceShared};
use crate::transaction::Admission;

/// REPLY_ERR messages are clipped so an error reply always fits the budget.
const MAX_ERROR_TEXT: usize = 512;

pub(crate) async fn handle_request(svc: &Arc<ServiceShared>, job: Job) {
    let Job {
        peer,
        header,
        payload,
    } = job;

    if header.opcode.is_reply() {
        // A reply opcode without the reply flag set is not a request.
        svc.stats.count_malformed();
        return;
    }

    let key = (peer, header.tid);
    match svc.cache_begin(key) {
        Admission::New => {}
        Admission::InFlight => {
            tracing::debug!(%peer, tid = header.tid, "dropping duplicate of in-flight request");
            return;
        }
        Admission::Replay(cached) => {
            tracing::debug!(%peer, tid = header.tid, "replaying cached reply");
            if let Some(datagram) = cached {
                svc.send_datagram(peer, &datagram).await;
            }
            return;
        }
    }

    let outcome = execute(svc, peer, &header, &payload).await;

    match outcome {
        Ok(None) => {
            svc.cache_complete(key, None);
        }
        Ok(Some(value)) => {
            let datagram = build_reply(svc, peer, header.tid, Ok(value));
            svc.cache_complete(key, Some(datagram.clone()));
            svc.send_datagram(peer, &datagram).await;
        }
        Err(error) => {
            tracing::debug!(%peer, tid = header.tid, op = %header.opcode, %error, "request failed");
            if header.opcode.expects_reply() {
                let datagram = build_reply(svc, peer, header.tid, Err(error));
                svc.cache_complete(key, Some(datagram.clone()));
                svc.send_datagram(peer, &datagram).await;
            } else {
                svc.cache_complete(key, None);
            }
        }
    }
}

/// Performs one request. `Ok(None)` means the opcode never replies.
async fn execute(
    svc: &Arc<ServiceShared>,
    peer: SocketAddr,
    header: &Header,
    payload: &[u8],
) -> Result<Option<Value>> {
    if header.version != WIRE_VERSION {
        return Err(NomirError::UnsupportedVersion(header.version));
    }

    let refs = PeerRefCodec::new(svc, peer);
    let value = codec::decode(payload, &refs)?;

    match header.opcode {
        Opcode::Hello => {
            permit(svc, Opcode::Hello, peer, Target::Service, None)?;
            Ok(Some(Value::Nil))
        }
        Opcode::List => {
            permit(svc, Opcode::List, peer, Target::Service, None)?;
            let names = svc
                .export_names()
                .into_iter()
                .map(Value::Text)
                .collect::<Vec<_>>();
            Ok(Some(Value::from(names)))
        }
        Opcode::Resolve => {
            let name = value
                .as_text()
                .ok_or_else(|| shape("RESOLVE", "a text name"))?;
            permit(svc, Opcode::Resolve, peer, Target::Name(name), None)?;
            let handle = svc
                .resolve_registered(name)
                .ok_or_else(|| NomirError::not_found(format!("name {name:?}")))?;
            Ok(Some(Value::Handle(handle)))
        }
        Opcode::GetAttr => {
            let [target, name] = parts::<2>(&value, "GETATTR", "(ref, text)")?;
            let name = name.as_text().ok_or_else(|| shape("GETATTR", "(ref, text)"))?;
            let (object, id) = local_target(svc, &target)?;
            permit(svc, Opcode::GetAttr, peer, Target::Id(id), Some(name))?;
            object.get_attr(name).await.map(Some)
        }
        Opcode::SetAttr => {
            let [target, name, new_value] = parts::<3>(&value, "SETATTR", "(ref, text, value)")?;
            let name = name
                .as_text()
                .ok_or_else(|| shape("SETATTR", "(ref, text, value)"))?;
            let (object, id) = local_target(svc, &target)?;
            permit(svc, Opcode::SetAttr, peer, Target::Id(id), Some(name))?;
            object.set_attr(name, new_value).await?;
            Ok(Some(Value::Nil))
        }
        Opcode::DelAttr => {
            let [target, name] = parts::<2>(&value, "DELATTR", "(ref, text)")?;
            let name = name.as_text().ok_or_else(|| shape("DELATTR", "(ref, text)"))?;
            let (object, id) = local_target(svc, &target)?;
            permit(svc, Opcode::DelAttr, peer, Target::Id(id), Some(name))?;
            object.del_attr(name).await?;
            Ok(Some(Value::Nil))
        }
        Opcode::GetItem => {
            let [target, item_key] = parts::<2>(&value, "GETITEM", "(ref, key)")?;
            let (object, id) = local_target(svc, &target)?;
            permit(svc, Opcode::GetItem, peer, Target::Id(id), item_key.as_text())?;
            object.get_item(&item_key).await.map(Some)
        }
        Opcode::SetItem => {
            let [target, item_key, new_value] = parts::<3>(&value, "SETITEM", "(ref, key, value)")?;
            let (object, id) = local_target(svc, &target)?;
            permit(svc, Opcode::SetItem, peer, Target::Id(id), item_key.as_text())?;
            object.set_item(item_key, new_value).await?;
            Ok(Some(Value::Nil))
        }
        Opcode::DelItem => {
            let [target, item_key] = parts::<2>(&value, "DELITEM", "(ref, key)")?;
            let (object, id) = local_target(svc, &target)?;
            permit(svc, Opcode::DelItem, peer, Target::Id(id), item_key.as_text())?;
            object.del_item(&item_key).await?;
            Ok(Some(Value::Nil))
        }
        Opcode::Len => {
            let (object, id) = local_target(svc, &value)?;
            permit(svc, Opcode::Len, peer, Target::Id(id), None)?;
            object.len().await.map(|n| Some(Value::Int(n)))
        }
        Opcode::Str => {
            let (object, id) = local_target(svc, &value)?;
            permit(svc, Opcode::Str, peer, Target::Id(id), None)?;
            object.str_text().await.map(|s| Some(Value::Text(s)))
        }
        Opcode::Repr => {
            let (object, id) = local_target(svc, &value)?;
            permit(svc, Opcode::Repr, peer, Target::Id(id), None)?;
            object.repr_text().await.map(|s| Some(Value::Text(s)))
        }
        Opcode::Call => {
            let [target, args, kwargs] = parts::<3>(&value, "CALL", "(ref, args, kwargs)")?;
            let args = args
                .as_list()
                .map(|l| l.snapshot())
                .ok_or_else(|| shape("CALL", "(ref, args, kwargs)"))?;
            let kwargs: Dict = kwargs
                .as_map()
                .cloned()
                .ok_or_else(|| shape("CALL", "(ref, args, kwargs)"))?;
            let (object, id) = local_target(svc, &target)?;
            permit(svc, Opcode::Call, peer, Target::Id(id), None)?;
            object.call(args, kwargs).await.map(Some)
        }
        Opcode::Release => {
            let (_, id) = local_target(svc, &value)?;
            permit(svc, Opcode::Release, peer, Target::Id(id), None)?;
            svc.release_export(id);
            Ok(None)
        }
        Opcode::Goodbye => {
            svc.forget_peer(peer);
            tracing::debug!(%peer, "peer departed");
            Ok(None)
        }
        Opcode::ReplyOk | Opcode::ReplyErr => unreachable!("filtered before dispatch"),
    }
}

fn shape(op: &str, expected: &str) -> NomirError {
    NomirError::malformed(0, format!("{op} payload must be {expected}"))
}

/// Destructures a sequence payload of exactly `N` elements.
fn parts<const N: usize>(value: &Value, op: &str, expected: &str) -> Result<[Value; N]> {
    let items = value
        .as_list()
        .map(|l| l.snapshot())
        .ok_or_else(|| shape(op, expected))?;
    items.try_into().map_err(|_| shape(op, expected))
}

/// The target of an object operation must be an entry of this service's
/// export table (which includes re-exported proxies, so chained references
/// keep working). Anything else is not dispatchable here.
fn local_target(svc: &ServiceShared, value: &Value) -> Result<(Handle, u64)> {
    let handle = value
        .as_handle()
        .ok_or_else(|| NomirError::malformed(0, "operation target must be a reference"))?;
    let id = svc
        .export_id_of(handle)
        .ok_or_else(|| NomirError::not_found("target object is not exported by this peer"))?;
    Ok((handle.clone(), id))
}

/// Runs the permission hook; a panicking authenticator denies.
fn permit(
    svc: &ServiceShared,
    op: Opcode,
    peer: SocketAddr,
    target: Target<'_>,
    key: Option<&str>,
) -> Result<()> {
    let auth = svc.authenticator();
    let allowed =
        catch_unwind(AssertUnwindSafe(|| auth.permit(op, peer, target, key))).unwrap_or(false);
    if allowed {
        Ok(())
    } else {
        svc.stats.count_denied();
        Err(NomirError::AccessDenied(match key {
            Some(k) => k.to_owned(),
            None => op.name().to_owned(),
        }))
    }
}

/// Encodes a reply datagram; failures degrade to an error reply that is
/// guaranteed to fit the budget.
fn build_reply(
    svc: &Arc<ServiceShared>,
    peer: SocketAddr,
    tid: u32,
    result: Result<Value>,
) -> Vec<u8> {
    match result {
        Ok(value) => {
            let refs = PeerRefCodec::new(svc, peer);
            match codec::encode(&value, &refs)
                .and_then(|body| frame::seal(Header::reply(tid, Opcode::ReplyOk), &body))
            {
                Ok(datagram) => datagram,
                Err(error) => error_reply(tid, &error),
            }
        }
        Err(error) => error_reply(tid, &error),
    }
}

fn error_reply(tid: u32, error: &NomirError) -> Vec<u8> {
    let mut message = error.to_string();
    if message.len() > MAX_ERROR_TEXT {
        let mut cut = MAX_ERROR_TEXT;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    let payload = Value::from(vec![
        Value::Int(error.kind() as u8 as i64),
        Value::Text(message),
    ]);
    // A clipped (kind, text) pair always encodes and always fits.
    let body = codec::encode(&payload, &codec::NoReferences).unwrap_or_default();
    frame::seal(Header::reply(tid, Opcode::ReplyErr), &body)
        .unwrap_or_else(|_| Header::reply(tid, Opcode::ReplyErr).encode().to_vec())
}
