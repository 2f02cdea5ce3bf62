#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

//! Full conversations against a scripted client that implements its own
//! half of the wire protocol.

use digest::Digest;
use num_bigint::BigUint;
use sha2::Sha256;

use crate::cipher::{self, Cipher, OpeningKey, SealingKey, _CLEAR};
use crate::encoding::Encoding;
use crate::kex::{compute_keys, DH, DH_GROUP14};
use crate::key::{KeyPair, PublicKey};
use crate::mac::{self, _NONE};
use crate::messages::{AuthMethod, Message};
use crate::negotiation::{self, Preferred};
use crate::session::Session;
use crate::sshbuffer::SSHBuffer;
use crate::{msg, AuthState, Disconnect, Error, User};

const CLIENT_ID: &[u8] = b"SSH-2.0-testclient";
const SERVER_ID: &[u8] = b"SSH-2.0-awa_ssh_0.1";

/// The client's half of the binary packet protocol.
struct Wire {
    read: SSHBuffer,
    write: SSHBuffer,
    opening: Box<dyn OpeningKey + Send>,
    sealing: Box<dyn SealingKey + Send>,
}

impl Wire {
    fn new() -> Self {
        Wire {
            read: SSHBuffer::new(),
            write: SSHBuffer::new(),
            opening: _CLEAR.make_opening_key(&[], &[], &[], &_NONE),
            sealing: _CLEAR.make_sealing_key(&[], &[], &[], &_NONE),
        }
    }

    /// Seal one message and feed it to the session.
    fn send(&mut self, session: &mut Session, msg: &Message) {
        let mut payload = Vec::new();
        msg.serialize(&mut payload).unwrap();
        self.sealing.write(&payload, &mut self.write);
        session.feed(&std::mem::take(&mut self.write.buffer));
    }

    /// Open every complete packet in `bytes`.
    fn recv(&mut self, bytes: &[u8]) -> Vec<Message> {
        self.read.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(payload) = cipher::read(&mut self.read, &mut *self.opening).unwrap() {
            out.push(Message::parse(&payload).unwrap());
        }
        out
    }
}

/// Poll and handle everything buffered in the session, collecting the
/// bytes it wants sent back.
fn drive(session: &mut Session) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    while let Some(msg) = session.poll()? {
        let replies = session.handle(msg)?;
        out.extend(session.encode_many(&replies)?);
    }
    Ok(out)
}

/// Run version exchange, key exchange and the `ssh-userauth` service
/// request, leaving both ends under aes256-ctr/hmac-sha2-512 keys.
fn handshake(users: Vec<User>) -> (Session, Wire) {
    let _ = env_logger::try_init();

    let host_key = KeyPair::generate_rsa(1024).unwrap();
    let host_public = host_key.public_key();
    let (mut session, greeting) = Session::new(host_key, users);
    let server_hello = session.encode_many(&greeting).unwrap();

    // Peel off the server banner, then read its KEXINIT.
    let eol = server_hello.windows(2).position(|w| w == b"\r\n").unwrap();
    assert_eq!(&server_hello[..eol], SERVER_ID);

    let mut wire = Wire::new();
    let msgs = wire.recv(&server_hello[eol + 2..]);
    let server_kexinit = match msgs.as_slice() {
        [Message::KexInit(raw)] => raw.clone(),
        other => panic!("expected KEXINIT, got {other:?}"),
    };

    // Our banner and KEXINIT.
    session.feed(b"SSH-2.0-testclient\r\n");
    let mut client_kexinit = Vec::new();
    negotiation::write_kex(&Preferred::DEFAULT, &mut client_kexinit);
    assert!(drive(&mut session).unwrap().is_empty());
    wire.send(&mut session, &Message::KexInit(client_kexinit.clone()));
    assert!(drive(&mut session).unwrap().is_empty());

    // Diffie-Hellman.
    let mut dh = DH::new(&DH_GROUP14);
    dh.generate_private_key();
    let e = dh.generate_public_key();
    wire.send(
        &mut session,
        &Message::KexDhInit {
            e: e.to_bytes_be(),
        },
    );
    let reply = drive(&mut session).unwrap();
    let msgs = wire.recv(&reply);
    let (host_key_blob, f, signature) = match msgs.as_slice() {
        [Message::KexDhReply {
            host_key,
            f,
            signature,
        }, Message::NewKeys] => (host_key.clone(), f.clone(), signature.clone()),
        other => panic!("expected KEXDH_REPLY + NEWKEYS, got {other:?}"),
    };

    let k = dh.compute_shared_secret(BigUint::from_bytes_be(&f));

    // Recompute the exchange hash and check the host key signature.
    let mut transcript = Vec::new();
    transcript.extend_ssh_string(CLIENT_ID);
    transcript.extend_ssh_string(SERVER_ID);
    transcript.extend_ssh_string(&client_kexinit);
    transcript.extend_ssh_string(&server_kexinit);
    transcript.extend_ssh_string(&host_key_blob);
    transcript.extend_ssh_mpint(&e.to_bytes_be());
    transcript.extend_ssh_mpint(&f);
    transcript.extend_ssh_mpint(&k.to_bytes_be());
    let hash = Sha256::digest(&transcript).to_vec();

    assert_eq!(session.session_id(), Some(&hash[..]));
    let parsed_host_key = PublicKey::parse_blob(&host_key_blob).unwrap();
    assert_eq!(parsed_host_key, host_public);
    assert!(parsed_host_key.verify_detached(&hash, &signature));

    // Install keys on both sides of the barrier.
    wire.send(&mut session, &Message::NewKeys);
    assert!(drive(&mut session).unwrap().is_empty());
    let pair = compute_keys::<Sha256>(
        &k.to_bytes_be(),
        &hash,
        &hash,
        cipher::AES_256_CTR,
        cipher::AES_256_CTR,
        mac::HMAC_SHA512,
        mac::HMAC_SHA512,
        false,
    )
    .unwrap();
    wire.sealing = pair.local_to_remote;
    wire.opening = pair.remote_to_local;

    // First encrypted exchange: the userauth service request.
    wire.send(
        &mut session,
        &Message::ServiceRequest("ssh-userauth".into()),
    );
    let reply = drive(&mut session).unwrap();
    assert_eq!(
        wire.recv(&reply),
        vec![Message::ServiceAccept("ssh-userauth".into())]
    );

    (session, wire)
}

fn password_request(user: &str, password: &str) -> Message {
    Message::UserauthRequest {
        user: user.into(),
        service: "ssh-connection".into(),
        method: AuthMethod::Password {
            password: password.into(),
            new_password: None,
        },
    }
}

fn alice_with_password() -> Vec<User> {
    vec![User {
        name: "alice".into(),
        password: Some("wonderland".into()),
        keys: vec![],
    }]
}

#[test]
fn test_password_auth_succeeds() {
    let (mut session, mut wire) = handshake(alice_with_password());

    wire.send(&mut session, &password_request("alice", "wonderland"));
    let reply = drive(&mut session).unwrap();
    assert_eq!(wire.recv(&reply), vec![Message::UserauthSuccess]);
    assert_eq!(session.auth_state(), &AuthState::Done);

    // Userauth is inert after success.
    wire.send(&mut session, &password_request("alice", "wonderland"));
    assert!(drive(&mut session).unwrap().is_empty());
    assert_eq!(session.auth_state(), &AuthState::Done);
}

#[test]
fn test_done_swallows_requests_for_any_service() {
    let (mut session, mut wire) = handshake(alice_with_password());

    wire.send(&mut session, &password_request("alice", "wonderland"));
    let reply = drive(&mut session).unwrap();
    assert_eq!(wire.recv(&reply), vec![Message::UserauthSuccess]);

    // Even a request naming a foreign service is swallowed once done;
    // no disconnect, no failure, no state change.
    wire.send(
        &mut session,
        &Message::UserauthRequest {
            user: "alice".into(),
            service: "ssh-weird".into(),
            method: AuthMethod::None,
        },
    );
    assert!(drive(&mut session).unwrap().is_empty());
    assert_eq!(session.auth_state(), &AuthState::Done);
}

#[test]
fn test_wrong_password_fails() {
    let (mut session, mut wire) = handshake(alice_with_password());

    wire.send(&mut session, &password_request("alice", "hunter2"));
    let reply = drive(&mut session).unwrap();
    assert_eq!(
        wire.recv(&reply),
        vec![Message::UserauthFailure {
            methods: vec!["publickey".into(), "password".into()],
            partial_success: false,
        }]
    );
    assert_eq!(
        session.auth_state(),
        &AuthState::InProgress {
            user: "alice".into(),
            service: "ssh-connection".into(),
            failed: 1,
        }
    );
}

#[test]
fn test_publickey_probe_then_signature() {
    let user_key = KeyPair::generate_rsa(1024).unwrap();
    let users = vec![User {
        name: "alice".into(),
        password: None,
        keys: vec![user_key.public_key()],
    }];
    let (mut session, mut wire) = handshake(users);

    // Probe without a signature.
    wire.send(
        &mut session,
        &Message::UserauthRequest {
            user: "alice".into(),
            service: "ssh-connection".into(),
            method: AuthMethod::Publickey {
                algo: "ssh-rsa".into(),
                key: user_key.public_key(),
                signature: None,
            },
        },
    );
    let reply = drive(&mut session).unwrap();
    assert_eq!(
        wire.recv(&reply),
        vec![Message::UserauthPkOk {
            algo: "ssh-rsa".into(),
            key: user_key.public_key().to_blob(),
        }]
    );
    assert_eq!(
        session.auth_state(),
        &AuthState::InProgress {
            user: "alice".into(),
            service: "ssh-connection".into(),
            failed: 0,
        }
    );

    // Now the real request, signed over the canonical payload.
    let mut signed = Vec::new();
    signed.extend_ssh_string(session.session_id().unwrap());
    signed.push(msg::USERAUTH_REQUEST);
    signed.extend_ssh_string(b"alice");
    signed.extend_ssh_string(b"ssh-connection");
    signed.extend_ssh_string(b"publickey");
    signed.push(1);
    signed.extend_ssh_string(b"ssh-rsa");
    signed.extend_ssh_string(&user_key.public_key().to_blob());
    let signature = user_key.sign_detached(&signed).unwrap();

    wire.send(
        &mut session,
        &Message::UserauthRequest {
            user: "alice".into(),
            service: "ssh-connection".into(),
            method: AuthMethod::Publickey {
                algo: "ssh-rsa".into(),
                key: user_key.public_key(),
                signature: Some(signature),
            },
        },
    );
    let reply = drive(&mut session).unwrap();
    assert_eq!(wire.recv(&reply), vec![Message::UserauthSuccess]);
    assert_eq!(session.auth_state(), &AuthState::Done);
}

#[test]
fn test_signature_of_unknown_key_fails() {
    let user_key = KeyPair::generate_rsa(1024).unwrap();
    let other_key = KeyPair::generate_rsa(1024).unwrap();
    let users = vec![User {
        name: "alice".into(),
        password: None,
        keys: vec![user_key.public_key()],
    }];
    let (mut session, mut wire) = handshake(users);

    // A valid signature from a key that is not in the database.
    let mut signed = Vec::new();
    signed.extend_ssh_string(session.session_id().unwrap());
    signed.push(msg::USERAUTH_REQUEST);
    signed.extend_ssh_string(b"alice");
    signed.extend_ssh_string(b"ssh-connection");
    signed.extend_ssh_string(b"publickey");
    signed.push(1);
    signed.extend_ssh_string(b"ssh-rsa");
    signed.extend_ssh_string(&other_key.public_key().to_blob());
    let signature = other_key.sign_detached(&signed).unwrap();

    wire.send(
        &mut session,
        &Message::UserauthRequest {
            user: "alice".into(),
            service: "ssh-connection".into(),
            method: AuthMethod::Publickey {
                algo: "ssh-rsa".into(),
                key: other_key.public_key(),
                signature: Some(signature),
            },
        },
    );
    let reply = drive(&mut session).unwrap();
    assert!(matches!(
        wire.recv(&reply).as_slice(),
        [Message::UserauthFailure { .. }]
    ));
}

#[test]
fn test_username_change_disconnects() {
    let (mut session, mut wire) = handshake(alice_with_password());

    wire.send(&mut session, &password_request("alice", "nope"));
    let reply = drive(&mut session).unwrap();
    assert!(matches!(
        wire.recv(&reply).as_slice(),
        [Message::UserauthFailure { .. }]
    ));

    wire.send(&mut session, &password_request("bob", "nope"));
    let reply = drive(&mut session).unwrap();
    assert_eq!(
        wire.recv(&reply),
        vec![Message::Disconnect {
            reason: Disconnect::ProtocolError,
            description: "username or service changed during authentication".into(),
            language: "".into(),
        }]
    );
}

#[test]
fn test_ten_failures_exhaust_the_session() {
    let (mut session, mut wire) = handshake(alice_with_password());

    for i in 1..=10 {
        wire.send(&mut session, &password_request("alice", "nope"));
        let reply = drive(&mut session).unwrap();
        assert!(matches!(
            wire.recv(&reply).as_slice(),
            [Message::UserauthFailure { .. }]
        ));
        assert_eq!(
            session.auth_state(),
            &AuthState::InProgress {
                user: "alice".into(),
                service: "ssh-connection".into(),
                failed: i,
            }
        );
    }

    wire.send(&mut session, &password_request("alice", "nope"));
    assert!(matches!(drive(&mut session), Err(Error::AuthExhausted)));
}

#[test]
fn test_none_and_hostbased_always_fail() {
    let (mut session, mut wire) = handshake(alice_with_password());

    for method in [AuthMethod::None, AuthMethod::Hostbased] {
        wire.send(
            &mut session,
            &Message::UserauthRequest {
                user: "alice".into(),
                service: "ssh-connection".into(),
                method,
            },
        );
        let reply = drive(&mut session).unwrap();
        assert!(matches!(
            wire.recv(&reply).as_slice(),
            [Message::UserauthFailure { .. }]
        ));
    }
}

#[test]
fn test_password_change_is_refused() {
    let (mut session, mut wire) = handshake(alice_with_password());

    wire.send(
        &mut session,
        &Message::UserauthRequest {
            user: "alice".into(),
            service: "ssh-connection".into(),
            method: AuthMethod::Password {
                password: "wonderland".into(),
                new_password: Some("looking-glass".into()),
            },
        },
    );
    let reply = drive(&mut session).unwrap();
    assert!(matches!(
        wire.recv(&reply).as_slice(),
        [Message::UserauthFailure { .. }]
    ));
}

#[test]
fn test_rekey_preserves_session_id_and_counters() {
    let (mut session, mut wire) = handshake(alice_with_password());
    let first_session_id = session.session_id().unwrap().to_vec();

    // Authenticate first; afterwards the message gate is unconstrained
    // and the peer may trigger a rekey.
    wire.send(&mut session, &password_request("alice", "wonderland"));
    let reply = drive(&mut session).unwrap();
    assert_eq!(wire.recv(&reply), vec![Message::UserauthSuccess]);

    // The client asks for new keys; the server reuses its original
    // KEXINIT, so only our side of the negotiation is fresh.
    let mut client_kexinit = Vec::new();
    negotiation::write_kex(&Preferred::DEFAULT, &mut client_kexinit);
    wire.send(&mut session, &Message::KexInit(client_kexinit.clone()));
    assert!(drive(&mut session).unwrap().is_empty());

    let mut dh = DH::new(&DH_GROUP14);
    dh.generate_private_key();
    let e = dh.generate_public_key();
    wire.send(
        &mut session,
        &Message::KexDhInit {
            e: e.to_bytes_be(),
        },
    );
    let reply = drive(&mut session).unwrap();
    let msgs = wire.recv(&reply);
    let (host_key_blob, f) = match msgs.as_slice() {
        [Message::KexDhReply { host_key, f, .. }, Message::NewKeys] => {
            (host_key.clone(), f.clone())
        }
        other => panic!("expected KEXDH_REPLY + NEWKEYS, got {other:?}"),
    };
    let k = dh.compute_shared_secret(BigUint::from_bytes_be(&f));

    // Session id must not move, even though the exchange hash did.
    assert_eq!(session.session_id().unwrap(), &first_session_id[..]);

    let mut transcript = Vec::new();
    transcript.extend_ssh_string(CLIENT_ID);
    transcript.extend_ssh_string(SERVER_ID);
    transcript.extend_ssh_string(&client_kexinit);
    transcript.extend_ssh_string(&session.exchange.server_kex_init);
    transcript.extend_ssh_string(&host_key_blob);
    transcript.extend_ssh_mpint(&e.to_bytes_be());
    transcript.extend_ssh_mpint(&f);
    transcript.extend_ssh_mpint(&k.to_bytes_be());
    let hash = Sha256::digest(&transcript).to_vec();
    assert_ne!(hash, first_session_id);

    wire.send(&mut session, &Message::NewKeys);
    assert!(drive(&mut session).unwrap().is_empty());
    let pair = compute_keys::<Sha256>(
        &k.to_bytes_be(),
        &first_session_id,
        &hash,
        cipher::AES_256_CTR,
        cipher::AES_256_CTR,
        mac::HMAC_SHA512,
        mac::HMAC_SHA512,
        false,
    )
    .unwrap();
    // Sequence numbers carry over: only the keys change.
    wire.sealing = pair.local_to_remote;
    wire.opening = pair.remote_to_local;

    // Traffic still flows under the second key set, which also proves
    // both directions kept their counters (the MACs would fail
    // otherwise).
    wire.send(
        &mut session,
        &Message::ServiceRequest("ssh-userauth".into()),
    );
    let reply = drive(&mut session).unwrap();
    assert_eq!(
        wire.recv(&reply),
        vec![Message::ServiceAccept("ssh-userauth".into())]
    );
}

#[test]
fn test_unknown_service_request_disconnects() {
    let _ = env_logger::try_init();
    let host_key = KeyPair::generate_rsa(1024).unwrap();
    let (mut session, _greeting) = Session::new(host_key, vec![]);

    // A full kex is not needed to exercise the dispatch.
    session.feed(b"SSH-2.0-testclient\r\n");
    let msg = session.poll().unwrap().unwrap();
    session.handle(msg).unwrap();

    let mut wire = Wire::new();
    let mut client_kexinit = Vec::new();
    negotiation::write_kex(&Preferred::DEFAULT, &mut client_kexinit);
    wire.send(&mut session, &Message::KexInit(client_kexinit));
    assert!(drive(&mut session).unwrap().is_empty());

    let mut dh = DH::new(&DH_GROUP14);
    dh.generate_private_key();
    let e = dh.generate_public_key();
    wire.send(
        &mut session,
        &Message::KexDhInit {
            e: e.to_bytes_be(),
        },
    );
    let reply = drive(&mut session).unwrap();
    let msgs = wire.recv(&reply);
    let f = match msgs.as_slice() {
        [Message::KexDhReply { f, .. }, Message::NewKeys] => f.clone(),
        other => panic!("unexpected {other:?}"),
    };
    let k = dh.compute_shared_secret(BigUint::from_bytes_be(&f));
    wire.send(&mut session, &Message::NewKeys);
    assert!(drive(&mut session).unwrap().is_empty());

    // On the first exchange the session id is the exchange hash itself.
    let hash = session.session_id().unwrap().to_vec();
    let pair = compute_keys::<Sha256>(
        &k.to_bytes_be(),
        &hash,
        &hash,
        cipher::AES_256_CTR,
        cipher::AES_256_CTR,
        mac::HMAC_SHA512,
        mac::HMAC_SHA512,
        false,
    )
    .unwrap();
    wire.sealing = pair.local_to_remote;
    wire.opening = pair.remote_to_local;

    wire.send(&mut session, &Message::ServiceRequest("ssh-sftp".into()));
    let reply = drive(&mut session).unwrap();
    assert!(matches!(
        wire.recv(&reply).as_slice(),
        [Message::Disconnect {
            reason: Disconnect::ServiceNotAvailable,
            ..
        }]
    ));
}
