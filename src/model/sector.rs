//! Department sectors that partition waiting queues and agent assignment.

use serde::{Deserialize, Serialize};

/// A fixed department category.
///
/// `AtendimentoHumano` is the escalation sector: its waiting queue is
/// visible to and claimable by agents of every sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Comercial,
    Compras,
    ContasPagar,
    ContasReceber,
    Rh,
    AtendimentoHumano,
    Geral,
    Outros,
}

impl Sector {
    /// All sectors, in display order. Queue snapshots report one count per entry.
    pub const ALL: [Sector; 8] = [
        Sector::Comercial,
        Sector::Compras,
        Sector::ContasPagar,
        Sector::ContasReceber,
        Sector::Rh,
        Sector::AtendimentoHumano,
        Sector::Geral,
        Sector::Outros,
    ];

    /// The escalation sector, claimable cross-sector.
    pub fn is_escalation(self) -> bool {
        matches!(self, Sector::AtendimentoHumano)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sector::Comercial => "comercial",
            Sector::Compras => "compras",
            Sector::ContasPagar => "contas_pagar",
            Sector::ContasReceber => "contas_receber",
            Sector::Rh => "rh",
            Sector::AtendimentoHumano => "atendimento_humano",
            Sector::Geral => "geral",
            Sector::Outros => "outros",
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Sector {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sector::ALL
            .into_iter()
            .find(|sector| sector.as_str() == s)
            .ok_or_else(|| crate::error::Error::NotFound(format!("unknown sector: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_roundtrip() {
        for sector in Sector::ALL {
            let parsed: Sector = sector.as_str().parse().unwrap();
            assert_eq!(parsed, sector);
        }

        assert!("marketing".parse::<Sector>().is_err());
    }

    #[test]
    fn test_escalation_sector() {
        assert!(Sector::AtendimentoHumano.is_escalation());
        assert!(!Sector::Comercial.is_escalation());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Sector::ContasPagar).unwrap();
        assert_eq!(json, "\"contas_pagar\"");
    }
}
