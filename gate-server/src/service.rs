use std::sync::Arc;

use async_trait::async_trait;
use slog::Logger;

use gate_core::backend::{BackendStream, ChannelBackendStream};
use gate_core::crypto::handshake::{decrypt_auth_token, CsHandshake, ScHandshake};
use gate_core::crypto::rsa_handshake::encrypt_with_client_pub;
use gate_core::crypto::token_aes::TokenAesKey;
use gate_core::crypto::AesKey;
use gate_core::error::{GateError, Result};
use gate_core::protocol::{Packet, MODULE_ID_SYSTEM, SYSTEM_SEQ_HANDSHAKE};
use gate_core::routetable::RouteTable;
use gate_core::secrets;
use gate_core::session::Session;
use gate_core::time_util::timestamp_secs;
use gate_core::tunnel::{PlayerTunnel, RoomTunnel, Tunnel, TunnelType};
use gate_core::worker::Worker;
use gate_core::service::Service;

use crate::demo_backend;

/// Reference `Service` implementation: real handshake/auth against the process-wide secrets
/// singleton, player/room tunnels backed by an in-process echo stand-in for the backend stream
/// the gRPC transport would otherwise provide. Wired up in `main.rs` so the crate runs end to
/// end without any external backend process to talk to.
///
/// Grounded on `app/gate/internal/service`'s concrete `Service`, following the handshake flow
/// described in SPEC_FULL.md §4.G and the dispatch flow in §4.E.
pub struct GateService {
    token_key: TokenAesKey,
    route_table: Arc<dyn RouteTable>,
    log: Logger,
}

impl GateService {
    pub fn new(token_key: TokenAesKey, route_table: Arc<dyn RouteTable>, log: Logger) -> GateService {
        GateService {
            token_key,
            route_table,
            log,
        }
    }

    /// Shared with the server's connect/disconnect hooks so `(color, uid) -> gate endpoint`
    /// registration happens against the same table the player tunnel cleans up on stop.
    pub fn route_table(&self) -> Arc<dyn RouteTable> {
        self.route_table.clone()
    }
}

#[async_trait]
impl Service for GateService {
    async fn auth(&self, body: &[u8]) -> Result<(Vec<u8>, Arc<Session>)> {
        let plain = if secrets::crypto_enabled() {
            secrets::rsa_decrypt(body)?
        } else {
            body.to_vec()
        };

        let handshake_packet = Packet::decode(&plain)?;
        if handshake_packet.module != MODULE_ID_SYSTEM || handshake_packet.seq != SYSTEM_SEQ_HANDSHAKE {
            return Err(GateError::Protocol("first packet is not a handshake"));
        }
        let cs = CsHandshake::decode(&handshake_packet.data)?;

        let auth = decrypt_auth_token(&self.token_key, &cs.token)?;

        let aes = AesKey::generate();
        let crypto_enabled = secrets::crypto_enabled();
        let session = Arc::new(Session::new(
            auth.account_id,
            cs.server_id,
            timestamp_secs(),
            Some(aes.clone()),
            crypto_enabled,
            auth.color,
            auth.status,
        ));

        // Handshake bumps both counters: CSIndex moves from its initial 0 to 1 (the value the
        // client's first post-handshake packet must carry), SCIndex from 1 to 2 (this reply's
        // own index). See SPEC_FULL.md §4.G / §9.
        let sc = ScHandshake {
            start_index: session.increase_cs_index(),
            key: aes.to_wire_bytes(),
        };
        let mut reply_packet = Packet::new(MODULE_ID_SYSTEM, SYSTEM_SEQ_HANDSHAKE, 0, sc.encode()?);
        reply_packet.index = session.increase_sc_index() as i32;
        let reply_plain = reply_packet.encode()?;

        let reply = if crypto_enabled {
            encrypt_with_client_pub(&cs.client_pub, &reply_plain)?
        } else {
            reply_plain
        };

        Ok((reply, session))
    }

    fn tunnel_type(&self, module: i32) -> TunnelType {
        TunnelType::from_module(module)
    }

    async fn create_tunnel(&self, tp: TunnelType, oid: i64, worker: &Arc<Worker>) -> Result<Arc<Tunnel>> {
        let (near, far) = ChannelBackendStream::pair();
        demo_backend::spawn_echo(far);
        let stream: Arc<dyn BackendStream> = Arc::new(near);

        let app: Arc<dyn gate_core::tunnel::AppTunnel> = match tp {
            TunnelType::Player => Arc::new(PlayerTunnel::new(
                worker.session(),
                worker.clone(),
                self.route_table.clone(),
                stream,
            )),
            TunnelType::Room => Arc::new(RoomTunnel::new(worker.session(), oid, stream)),
            TunnelType::Team | TunnelType::Fight | TunnelType::Chat | TunnelType::Mail => {
                return Err(GateError::Protocol(
                    "tunnel type has no concrete application wiring in this deployment",
                ));
            }
        };

        Ok(Tunnel::spawn(app, worker.clone(), worker.log().clone()))
    }

    async fn on_connected(&self, session: &Arc<Session>) {
        slog::info!(self.log, "player connected"; "uid" => session.uid(), "color" => session.color());
    }

    async fn on_disconnect(&self, session: &Arc<Session>) {
        slog::info!(self.log, "player disconnected"; "uid" => session.uid());
    }

    async fn handle(&self, session: &Arc<Session>, worker: &Arc<Worker>, mut packet: Packet) -> Result<()> {
        if session.is_crypto() {
            if packet.index as i64 != session.cs_index() {
                return Err(GateError::SequenceMismatch {
                    expected: session.cs_index(),
                    got: packet.index as i64,
                });
            }
            session.increase_cs_index();
        }

        packet.decompress_in_place()?;

        if packet.obj == 0 {
            packet.obj = session.uid();
        }

        let tunnel = worker.tunnel(packet.module, packet.obj).await?;
        tunnel.forward(&packet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_core::crypto::handshake::AuthToken;
    use gate_core::crypto::rsa_handshake::RsaHandshakeKey;
    use gate_core::crypto::token_aes::TOKEN_KEY_SIZE;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
    use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
    use sha2::Sha256;
    use std::sync::Mutex;

    /// `secrets` is one process-wide singleton; serializes the tests that touch it so they
    /// can't observe each other's crypto_enabled flips.
    static SECRETS_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn make_token(key: &TokenAesKey, auth: &AuthToken) -> String {
        use base64::Engine;
        let plain = auth.encode().unwrap();
        let blob = key.encrypt(&plain);
        base64::engine::general_purpose::URL_SAFE.encode(blob)
    }

    /// Pins the process-wide secrets singleton to a known state before exercising `auth`, so
    /// this test's outcome doesn't depend on whether some other test in this binary already
    /// flipped `crypto_enabled` — `secrets` is a single global, not per-test state.
    fn pin_secrets(crypto_enabled: bool) {
        let mut rng = rand::thread_rng();
        let private = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        use rsa::pkcs8::EncodePrivateKey;
        let der = private.to_pkcs8_der().unwrap();
        use base64::Engine;
        let b64 = base64::engine::general_purpose::URL_SAFE.encode(der.as_bytes());
        let rsa_key = RsaHandshakeKey::from_base64_pkcs8(&b64).unwrap();
        secrets::init(rsa_key, TokenAesKey::new([0u8; TOKEN_KEY_SIZE]), crypto_enabled);
    }

    #[tokio::test]
    async fn auth_without_crypto_installs_a_session() {
        let _guard = SECRETS_TEST_LOCK.lock().unwrap();
        pin_secrets(false);
        let token_key = TokenAesKey::new([9u8; TOKEN_KEY_SIZE]);
        let auth = AuthToken {
            account_id: 77,
            color: "blue".into(),
            status: 1,
            timeout: timestamp_secs() + 60,
        };
        let token = make_token(&token_key, &auth);

        let cs = CsHandshake {
            token,
            server_id: 3,
            client_pub: vec![],
        };
        let handshake_packet = Packet::new(MODULE_ID_SYSTEM, SYSTEM_SEQ_HANDSHAKE, 0, cs.encode().unwrap());
        let body = handshake_packet.encode().unwrap();

        let service = GateService::new(token_key, Arc::new(gate_core::routetable::InMemoryRouteTable::new()), test_logger());
        let (reply, session) = service.auth(&body).await.unwrap();

        assert_eq!(session.uid(), 77);
        assert_eq!(session.color(), "blue");
        let reply_packet = Packet::decode(&reply).unwrap();
        assert_eq!(reply_packet.index, 2);
        let sc = ScHandshake::decode(&reply_packet.data).unwrap();
        assert_eq!(sc.key.len(), 48);
        assert_eq!(sc.start_index, 1);
        assert_eq!(session.cs_index(), 1);
    }

    #[tokio::test]
    async fn auth_rejects_non_handshake_first_packet() {
        let token_key = TokenAesKey::new([1u8; TOKEN_KEY_SIZE]);
        let service = GateService::new(token_key, Arc::new(gate_core::routetable::InMemoryRouteTable::new()), test_logger());
        let body = Packet::new(0, 9, 0, vec![]).encode().unwrap();
        assert!(service.auth(&body).await.is_err());
    }

    #[tokio::test]
    async fn auth_with_crypto_enabled_rsa_roundtrips_the_reply() {
        let _guard = SECRETS_TEST_LOCK.lock().unwrap();
        let mut rng = rand::thread_rng();
        let server_priv = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let server_pub = RsaPublicKey::from(&server_priv);
        let server_der = server_priv.to_pkcs8_der().unwrap();
        use base64::Engine;
        let server_b64 = base64::engine::general_purpose::URL_SAFE.encode(server_der.as_bytes());
        let rsa_key = RsaHandshakeKey::from_base64_pkcs8(&server_b64).unwrap();

        let client_priv = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let client_pub = RsaPublicKey::from(&client_priv);
        let client_pub_der = client_pub.to_public_key_der().unwrap();

        let token_key = TokenAesKey::new([2u8; TOKEN_KEY_SIZE]);
        secrets::init(rsa_key, token_key.clone(), true);

        let auth = AuthToken {
            account_id: 5,
            color: "red".into(),
            status: 0,
            timeout: timestamp_secs() + 60,
        };
        let token = make_token(&token_key, &auth);
        let cs = CsHandshake {
            token,
            server_id: 1,
            client_pub: client_pub_der.as_bytes().to_vec(),
        };
        let handshake_packet = Packet::new(MODULE_ID_SYSTEM, SYSTEM_SEQ_HANDSHAKE, 0, cs.encode().unwrap());
        let plain = handshake_packet.encode().unwrap();
        let cipher = server_pub
            .encrypt(&mut rng, Oaep::new::<Sha256>(), &plain)
            .unwrap();

        let service = GateService::new(token_key, Arc::new(gate_core::routetable::InMemoryRouteTable::new()), test_logger());
        let (reply, session) = service.auth(&cipher).await.unwrap();
        assert!(session.is_crypto());

        let reply_plain = client_priv.decrypt(Oaep::new::<Sha256>(), &reply).unwrap();
        let reply_packet = Packet::decode(&reply_plain).unwrap();
        let sc = ScHandshake::decode(&reply_packet.data).unwrap();
        assert_eq!(sc.key.len(), 48);
    }

    #[tokio::test]
    async fn tunnel_type_routes_room_module_only() {
        let token_key = TokenAesKey::new([4u8; TOKEN_KEY_SIZE]);
        let service = GateService::new(token_key, Arc::new(gate_core::routetable::InMemoryRouteTable::new()), test_logger());
        assert_eq!(service.tunnel_type(0), TunnelType::Player);
        assert_eq!(
            service.tunnel_type(gate_core::protocol::MODULE_ID_ROOM),
            TunnelType::Room
        );
    }
}
