//! One-time phone verification codes.

use crate::delivery::DeliverySink;
use crate::error::FlowError;
use crate::flow::{mask_phone, FlowUpdate, PhonePatch, StepPayload};
use crate::store::FlowStore;
use rand::Rng;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, instrument};

/// Number of digits in a verification code.
pub const CODE_DIGITS: usize = 4;

/// Issues and checks verification codes.
#[derive(Clone)]
pub struct ChallengeService {
    delivery: Arc<dyn DeliverySink>,
}

impl ChallengeService {
    pub fn new(delivery: Arc<dyn DeliverySink>) -> Self {
        Self { delivery }
    }

    /// Uniformly random code with leading zeros kept, e.g. `"0042"`.
    pub fn generate_code() -> String {
        let upper = 10u32.pow(CODE_DIGITS as u32);
        let value = rand::thread_rng().gen_range(0..upper);
        format!("{:0width$}", value, width = CODE_DIGITS)
    }

    /// Issue a fresh code for `phone_number`, store it on the flow and send it.
    ///
    /// Any previously issued code stops matching as soon as the new one is stored.
    #[instrument(skip(self, store, phone_number), fields(phone = %mask_phone(phone_number)))]
    pub async fn issue(
        &self,
        store: &dyn FlowStore,
        phone_number: &str,
    ) -> Result<String, FlowError> {
        let code = Self::generate_code();

        store
            .write(FlowUpdate::new(StepPayload::Phone(PhonePatch::issued(
                phone_number,
                code.clone(),
            ))))
            .await?;

        self.delivery.send_code(phone_number, &code).await?;

        info!("Verification code issued");
        Ok(code)
    }

    /// Compare a submitted code with the stored one.
    pub fn verify(submitted: &str, stored: &str) -> bool {
        submitted.len() == stored.len() && submitted.as_bytes().ct_eq(stored.as_bytes()).into()
    }
}
