//! One-time machine registration with a four character code.

use serde_json::json;
use tracing::info;

use crate::{
    dao::identity::{IdentityStore, MachineIdentity},
    dto::{
        rpc::{MessageEnvelope, RpcRequest},
        session::RegistrationReply,
    },
    error::RegistrationError,
    services::rpc_channel::RpcClient,
};

/// Registration endpoint; body is `{"code": ..}`.
pub const REGISTER_PATH: &str = "/api/v1/register";
const CODE_LEN: usize = 4;

/// Exchange `code` for a machine identity and persist it through `store`.
pub async fn register(
    rpc: &dyn RpcClient,
    store: &IdentityStore,
    code: &str,
) -> Result<MachineIdentity, RegistrationError> {
    let code = code.trim();
    if code.chars().count() != CODE_LEN {
        return Err(RegistrationError::InvalidCode);
    }

    let request = RpcRequest::post(REGISTER_PATH).with_body(json!({ "code": code }));
    let response = rpc.call(request).await?;
    if !response.is_success() {
        return Err(RegistrationError::Rejected {
            status: response.status,
        });
    }

    let reply: MessageEnvelope<RegistrationReply> = response
        .json_body()
        .map_err(|err| RegistrationError::MalformedResponse(err.to_string()))?;
    let identity = MachineIdentity::from_parts(&reply.message.uuid, reply.message.token)?;
    store.save(&identity)?;

    info!(uuid = %identity.uuid, path = %store.path().display(), "machine registered");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{error::IdentityError, testing::FakeRpc};

    fn store() -> IdentityStore {
        let dir = std::env::temp_dir().join(format!("ssbd-register-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        IdentityStore::new(dir.join("ssbd.json"))
    }

    #[tokio::test]
    async fn successful_registration_is_persisted() {
        let rpc = FakeRpc::new();
        let machine = Uuid::new_v4();
        rpc.reply_with(
            200,
            &json!({ "message": { "uuid": machine, "token": "issued" } }).to_string(),
        );
        let store = store();

        let identity = register(&rpc, &store, "AB12").await.unwrap();
        assert_eq!(identity.uuid, machine);
        assert_eq!(store.load().unwrap(), identity);

        let calls = rpc.calls();
        assert_eq!(calls[0].path, REGISTER_PATH);
        assert_eq!(calls[0].body, Some(json!({ "code": "AB12" })));
    }

    #[tokio::test]
    async fn codes_must_be_four_characters() {
        let rpc = FakeRpc::new();
        for code in ["", "ABC", "ABCDE"] {
            assert!(matches!(
                register(&rpc, &store(), code).await,
                Err(RegistrationError::InvalidCode)
            ));
        }
        assert!(rpc.calls().is_empty());
    }

    #[tokio::test]
    async fn rejected_codes_save_nothing() {
        let rpc = FakeRpc::new();
        rpc.reply_with(404, r#"{"message":"unknown code"}"#);
        let store = store();

        assert!(matches!(
            register(&rpc, &store, "ZZZZ").await,
            Err(RegistrationError::Rejected { status: 404 })
        ));
        assert!(matches!(store.load(), Err(IdentityError::Io { .. })));
    }
}
