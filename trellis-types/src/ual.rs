use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Scheme prefix shared by every UAL.
pub const UAL_PREFIX: &str = "did:dkg:";

/// Universal Asset Locator: `did:dkg:<blockchain>/<contract>/<tokenId>`.
///
/// The blockchain part may itself contain `:` (e.g. `otp:2043`), so parsing
/// splits from the right. Contract addresses are normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ual {
    blockchain: String,
    contract: String,
    token_id: u64,
}

impl Ual {
    /// Derive a UAL from its on-chain coordinates.
    pub fn derive(blockchain: &str, contract: &str, token_id: u64) -> Self {
        Self {
            blockchain: blockchain.to_string(),
            contract: contract.to_lowercase(),
            token_id,
        }
    }

    /// Resolve a UAL string into its coordinates.
    pub fn parse(s: &str) -> Result<Self, TypesError> {
        let invalid = |reason: &str| TypesError::InvalidUal {
            ual: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = s
            .strip_prefix(UAL_PREFIX)
            .ok_or_else(|| invalid("missing did:dkg: prefix"))?;

        let mut parts = rest.rsplitn(3, '/');
        let token = parts.next().ok_or_else(|| invalid("missing token id"))?;
        let contract = parts.next().ok_or_else(|| invalid("missing contract"))?;
        let blockchain = parts.next().ok_or_else(|| invalid("missing blockchain"))?;

        if blockchain.is_empty() {
            return Err(invalid("empty blockchain"));
        }
        if contract.is_empty() {
            return Err(invalid("empty contract"));
        }
        let token_id = token
            .parse::<u64>()
            .map_err(|e| invalid(&format!("token id: {}", e)))?;

        Ok(Self::derive(blockchain, contract, token_id))
    }

    pub fn blockchain(&self) -> &str {
        &self.blockchain
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn token_id(&self) -> u64 {
        self.token_id
    }

    /// Storage-safe rendering used to name a paranet's dedicated repository.
    pub fn repository_name(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| if c == ':' || c == '/' { '-' } else { c })
            .collect()
    }
}

impl fmt::Display for Ual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}/{}/{}",
            UAL_PREFIX, self.blockchain, self.contract, self.token_id
        )
    }
}

impl FromStr for Ual {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ual::parse(s)
    }
}

impl TryFrom<String> for Ual {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ual::parse(&value)
    }
}

impl From<Ual> for String {
    fn from(ual: Ual) -> Self {
        ual.to_string()
    }
}
