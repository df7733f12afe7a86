use alloy::{
    dyn_abi::TypedData,
    primitives::{Address, Bytes},
    signers::{Signer, local::PrivateKeySigner},
};

use crate::error::EngineError;

/// Signing capability of the key that controls a smart account
pub trait SmartAccountSigner: Send + Sync {
    /// Address of the signing key
    fn address(&self) -> Address;

    /// EIP-191 personal-sign over `message`
    fn sign_message(
        &self,
        message: &[u8],
    ) -> impl Future<Output = Result<Bytes, EngineError>> + Send;

    /// EIP-712 signature over `typed_data`
    fn sign_typed_data(
        &self,
        typed_data: &TypedData,
    ) -> impl Future<Output = Result<Bytes, EngineError>> + Send;
}

impl SmartAccountSigner for PrivateKeySigner {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes, EngineError> {
        let signature = Signer::sign_message(self, message)
            .await
            .map_err(|e| EngineError::SignerError {
                message: format!("Failed to sign message: {e}"),
            })?;
        Ok(Bytes::from(signature.as_bytes()))
    }

    async fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Bytes, EngineError> {
        let signature = self
            .sign_dynamic_typed_data(typed_data)
            .await
            .map_err(|e| EngineError::SignerError {
                message: format!("Failed to sign typed data: {e}"),
            })?;
        Ok(Bytes::from(signature.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Signature, b256, eip191_hash_message};

    use super::*;

    #[tokio::test]
    async fn local_signer_produces_recoverable_signatures() {
        let signer = PrivateKeySigner::from_bytes(&b256!(
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        ))
        .unwrap();

        let signature = SmartAccountSigner::sign_message(&signer, b"hello").await.unwrap();
        assert_eq!(signature.len(), 65);

        let parsed = Signature::from_raw(&signature).unwrap();
        let recovered = parsed
            .recover_address_from_prehash(&eip191_hash_message(b"hello"))
            .unwrap();
        assert_eq!(recovered, SmartAccountSigner::address(&signer));
    }
}
