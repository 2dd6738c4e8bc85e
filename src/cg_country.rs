//! Countries a miner can operate from, and what running a rig costs there.

use rand::Rng;

use crate::cg_interface::Money;

/// Closed set of countries; the price table below must cover every variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Country {
    Romania,
    Poland,
    Spain,
    Germany,
    GreatBritain,
}

impl Country {
    pub const ALL: [Country; 5] = [
        Country::Romania,
        Country::Poland,
        Country::Spain,
        Country::Germany,
        Country::GreatBritain,
    ];

    /// Energy price of this country in percent of the base payment.
    pub fn price_percent(&self) -> Money {
        match self {
            Country::Romania => 80,
            Country::Poland => 90,
            Country::Spain => 100,
            Country::Germany => 120,
            Country::GreatBritain => 130,
        }
    }

    /// Payment a miner in this country owes for a base `amount`.
    ///
    /// Integer arithmetic, rounded down. Saturates instead of wrapping.
    pub fn scale(&self, amount: Money) -> Money {
        amount.saturating_mul(self.price_percent()) / 100
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Country {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}
