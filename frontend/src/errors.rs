//! Maps raw wallet/RPC failure text to the message shown to the user.
//!
//! Rules are checked in order against the lowercased reason and the first
//! match wins, so the specific contract reverts must stay above the generic
//! `execution reverted` rule.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UserRejection,
    InsufficientFunds,
    ContractRejection,
    NetworkFailure,
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: FailureKind,
    pub message: String,
}

struct Rule {
    patterns: &'static [&'static str],
    kind: FailureKind,
    message: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        patterns: &["user rejected", "user denied"],
        kind: FailureKind::UserRejection,
        message: "Transação rejeitada pelo usuário",
    },
    Rule {
        patterns: &["insufficient funds"],
        kind: FailureKind::InsufficientFunds,
        message: "Saldo insuficiente para completar a transação",
    },
    Rule {
        patterns: &["property not for sale"],
        kind: FailureKind::ContractRejection,
        message: "Propriedade não está à venda",
    },
    Rule {
        patterns: &["insufficient payment"],
        kind: FailureKind::ContractRejection,
        message: "Valor enviado é insuficiente",
    },
    Rule {
        patterns: &["cannot buy own property"],
        kind: FailureKind::ContractRejection,
        message: "Você não pode comprar sua própria propriedade",
    },
    Rule {
        patterns: &["not property owner"],
        kind: FailureKind::ContractRejection,
        message: "Você não é o dono desta propriedade",
    },
    Rule {
        patterns: &["already for sale"],
        kind: FailureKind::ContractRejection,
        message: "Propriedade já está à venda",
    },
    Rule {
        patterns: &["offer not active"],
        kind: FailureKind::ContractRejection,
        message: "Oferta não está mais ativa",
    },
    Rule {
        patterns: &["invalid offer index"],
        kind: FailureKind::ContractRejection,
        message: "Índice de oferta inválido",
    },
    Rule {
        patterns: &["network", "connection"],
        kind: FailureKind::NetworkFailure,
        message: "Erro de conexão com a rede",
    },
    Rule {
        patterns: &["timeout"],
        kind: FailureKind::NetworkFailure,
        message: "Tempo de espera esgotado",
    },
    Rule {
        patterns: &["gas"],
        kind: FailureKind::NetworkFailure,
        message: "Erro relacionado ao gas da transação",
    },
    Rule {
        patterns: &["nonce"],
        kind: FailureKind::NetworkFailure,
        message: "Erro de nonce - tente novamente",
    },
    Rule {
        patterns: &["execution reverted"],
        kind: FailureKind::ContractRejection,
        message: "Transação revertida pelo contrato",
    },
    Rule {
        patterns: &["invalid address"],
        kind: FailureKind::ContractRejection,
        message: "Endereço inválido",
    },
    Rule {
        patterns: &["invalid amount"],
        kind: FailureKind::ContractRejection,
        message: "Valor inválido",
    },
];

/// Classifies a failure reason. Never fails: an unmatched reason keeps its
/// first line verbatim and an empty reason stays empty.
pub fn categorize(reason: &str) -> Classification {
    let lowered = reason.to_lowercase();
    for rule in RULES {
        if rule.patterns.iter().any(|p| lowered.contains(p)) {
            return Classification {
                kind: rule.kind,
                message: rule.message.to_string(),
            };
        }
    }
    Classification {
        kind: FailureKind::Unclassified,
        message: reason.split('\n').next().unwrap_or_default().to_string(),
    }
}

pub fn classify(reason: &str) -> String {
    categorize(reason).message
}

/// Same as [`classify`] for an optional reason; `None` yields `""`.
pub fn classify_opt(reason: Option<&str>) -> String {
    reason.map(classify).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_reasons() {
        assert_eq!(
            classify("User rejected the request"),
            "Transação rejeitada pelo usuário"
        );
        assert_eq!(
            classify("execution reverted: Property not for sale"),
            "Propriedade não está à venda"
        );
        assert_eq!(
            categorize("MetaMask Tx Signature: User denied transaction signature.").kind,
            FailureKind::UserRejection
        );
    }

    #[test]
    fn empty_reason_is_empty() {
        assert_eq!(classify(""), "");
        assert_eq!(classify_opt(None), "");
    }

    #[test]
    fn specific_revert_wins_over_generic() {
        let c = categorize("execution reverted: Offer not active");
        assert_eq!(c.kind, FailureKind::ContractRejection);
        assert_eq!(c.message, "Oferta não está mais ativa");
        assert_eq!(
            classify("execution reverted"),
            "Transação revertida pelo contrato"
        );
    }

    #[test]
    fn network_rules_keep_their_order() {
        // "connection timeout" hits the network rule before the timeout one
        assert_eq!(classify("connection timeout"), "Erro de conexão com a rede");
        assert_eq!(classify("request timeout"), "Tempo de espera esgotado");
        assert_eq!(
            categorize("intrinsic gas too low").kind,
            FailureKind::NetworkFailure
        );
    }

    #[test]
    fn unmatched_keeps_first_line() {
        let c = categorize("something odd happened\nstack: at foo\nat bar");
        assert_eq!(c.kind, FailureKind::Unclassified);
        assert_eq!(c.message, "something odd happened");
    }
}
