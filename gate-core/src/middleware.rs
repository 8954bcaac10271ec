use slog::Logger;

use crate::protocol::Packet;

/// Builds a per-connection child logger carrying `wid`/`uid`/`client_ip`, the way every other
/// field gets attached to request-scoped work once `flux::logging::init()` (see
/// `gate-server/src/logging.rs`) hands back a root logger.
pub fn connection_logger(root: &Logger, wid: u64, client_ip: &str) -> Logger {
    root.new(slog::o!("wid" => wid, "client_ip" => client_ip.to_string()))
}

/// Logs one inbound (client -> server) packet's metadata (module/seq/obj/index/len, never the
/// body itself), but only when `dev_profile` is set and the packet isn't a heartbeat — matching
/// the teacher's "Request" middleware, which exists purely to keep heartbeat traffic from
/// drowning out everything else in a dev log.
pub fn log_request(log: &Logger, pack: &Packet, dev_profile: bool) {
    if !dev_profile || pack.is_heartbeat() {
        return;
    }
    slog::debug!(
        log,
        "cs packet";
        "module" => pack.module,
        "seq" => pack.seq,
        "obj" => pack.obj,
        "index" => pack.index,
        "len" => pack.data.len(),
    );
}

/// Symmetric "Reply" middleware for outbound (server -> client) packets.
pub fn log_reply(log: &Logger, pack: &Packet, dev_profile: bool) {
    if !dev_profile || pack.is_heartbeat() {
        return;
    }
    slog::debug!(
        log,
        "sc packet";
        "module" => pack.module,
        "seq" => pack.seq,
        "obj" => pack.obj,
        "index" => pack.index,
        "len" => pack.data.len(),
    );
}

/// Logs a best-effort push failure (e.g. a backend-initiated message that couldn't reach a
/// disconnected worker) without turning it into a hard error for the caller.
pub fn log_push_failed(log: &Logger, uid: i64, err: &dyn std::fmt::Display) {
    slog::warn!(log, "push failed"; "uid" => uid, "err" => %err);
}
