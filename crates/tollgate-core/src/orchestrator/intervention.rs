use crate::decision::{Intervention, RiskLevel, TrustLevel};

use Intervention::{Ask, Block, Notify, Silent};

/// Rows: risk low..critical. Columns: trust untrusted..elevated.
const MATRIX: [[Intervention; 5]; 4] = [
    [Notify, Silent, Silent, Silent, Silent],
    [Ask, Notify, Notify, Silent, Silent],
    [Block, Ask, Ask, Notify, Notify],
    [Block, Block, Block, Ask, Ask],
];

/// Quantize a continuous score with four ascending cut points. A score
/// equal to a cut point falls in the upper level; NaN is untrusted.
pub fn quantize_trust(score: f64, breakpoints: &[f64; 4]) -> TrustLevel {
    if score.is_nan() {
        return TrustLevel::Untrusted;
    }
    let passed = breakpoints.iter().filter(|bp| score >= **bp).count();
    TrustLevel::ALL[passed]
}

pub fn decide(risk: RiskLevel, trust: TrustLevel) -> Intervention {
    MATRIX[risk.index()][trust.index()]
}

#[cfg(test)]
mod tests {
    use super::*;

    const BP: [f64; 4] = [0.2, 0.4, 0.6, 0.8];

    #[test]
    fn quantization_uses_breakpoints() {
        assert_eq!(quantize_trust(0.0, &BP), TrustLevel::Untrusted);
        assert_eq!(quantize_trust(0.2, &BP), TrustLevel::Guarded);
        assert_eq!(quantize_trust(0.5, &BP), TrustLevel::Neutral);
        assert_eq!(quantize_trust(0.79, &BP), TrustLevel::Trusted);
        assert_eq!(quantize_trust(1.0, &BP), TrustLevel::Elevated);
        assert_eq!(quantize_trust(f64::NAN, &BP), TrustLevel::Untrusted);
    }

    #[test]
    fn matrix_corners() {
        assert_eq!(decide(RiskLevel::Low, TrustLevel::Elevated), Silent);
        assert_eq!(decide(RiskLevel::Low, TrustLevel::Untrusted), Notify);
        assert_eq!(decide(RiskLevel::Critical, TrustLevel::Untrusted), Block);
        assert_eq!(decide(RiskLevel::Critical, TrustLevel::Elevated), Ask);
        assert_eq!(decide(RiskLevel::High, TrustLevel::Neutral), Ask);
        assert_eq!(decide(RiskLevel::Medium, TrustLevel::Neutral), Notify);
    }

    #[test]
    fn caution_never_decreases_with_risk() {
        let rank = |i: Intervention| match i {
            Silent => 0,
            Notify => 1,
            Ask => 2,
            Block => 3,
        };
        for trust in TrustLevel::ALL {
            let row: Vec<_> = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical]
                .into_iter()
                .map(|r| rank(decide(r, trust)))
                .collect();
            assert!(row.windows(2).all(|w| w[0] <= w[1]), "{trust}: {row:?}");
        }
    }
}
