//! Automated responder boundary.
//!
//! The intent classifier itself is an external collaborator; the core only
//! consumes its verdict. [`KeywordResponder`] is the built-in rule-based
//! implementation used when no external classifier is configured.

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;
use crate::model::{Message, Sector};

/// Verdict of the automated responder for one customer message.
#[derive(Debug, Clone)]
pub struct BotReply {
    /// Text to send back to the customer.
    pub response: String,
    /// Classified intent, if any.
    pub intent: Option<String>,
    /// The responder cannot resolve this; hand off to a human queue.
    pub needs_human: bool,
}

/// Black-box classifier/responder for `bot_handling` conversations.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(
        &self,
        message: &str,
        context: &[Message],
        business_hours: bool,
    ) -> Result<BotReply>;
}

/// Map a classified intent onto the sector whose queue should receive the
/// conversation on escalation.
pub fn intent_to_sector(intent: &str) -> Option<Sector> {
    match intent {
        "atendente" => Some(Sector::AtendimentoHumano),
        other => other.parse().ok(),
    }
}

/// Rule-based responder: keyword patterns for intent, explicit
/// human-escalation detection, canned replies.
pub struct KeywordResponder {
    human_request: Regex,
    intents: Vec<(&'static str, Regex)>,
}

impl KeywordResponder {
    pub fn new() -> Self {
        Self {
            human_request: Regex::new(
                r"(?i)\b(atendente|humano|pessoa de verdade|falar com alguem|falar com alguém)\b",
            )
            .expect("static regex"),
            intents: vec![
                (
                    "comercial",
                    Regex::new(r"(?i)\b(preço|preco|orçamento|orcamento|comprar|proposta|produto)\b")
                        .expect("static regex"),
                ),
                (
                    "compras",
                    Regex::new(r"(?i)\b(fornecedor|cotação|cotacao|fornecimento)\b")
                        .expect("static regex"),
                ),
                (
                    "contas_pagar",
                    Regex::new(r"(?i)\b(boleto|fatura|pagamento|pagar)\b").expect("static regex"),
                ),
                (
                    "contas_receber",
                    Regex::new(r"(?i)\b(cobrança|cobranca|receber|recebimento)\b")
                        .expect("static regex"),
                ),
                (
                    "rh",
                    Regex::new(r"(?i)\b(vaga|currículo|curriculo|emprego|trabalhar)\b")
                        .expect("static regex"),
                ),
            ],
        }
    }

    fn classify(&self, message: &str) -> Option<&'static str> {
        self.intents
            .iter()
            .find(|(_, pattern)| pattern.is_match(message))
            .map(|(intent, _)| *intent)
    }
}

impl Default for KeywordResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Responder for KeywordResponder {
    async fn respond(
        &self,
        message: &str,
        _context: &[Message],
        business_hours: bool,
    ) -> Result<BotReply> {
        if self.human_request.is_match(message) {
            let response = if business_hours {
                "Claro! Estou te transferindo para um atendente. Aguarde um momento."
            } else {
                "Estamos fora do horário de atendimento, mas você entrou na fila e um atendente responderá assim que possível."
            };
            return Ok(BotReply {
                response: response.to_string(),
                intent: Some("atendente".to_string()),
                needs_human: true,
            });
        }

        let intent = self.classify(message);
        let response = match intent {
            Some("comercial") => "Posso ajudar com informações comerciais! Conte um pouco mais sobre o que você procura.",
            Some("compras") => "Entendi, assunto de compras. Pode me passar os detalhes da cotação?",
            Some("contas_pagar") => "Sobre pagamentos: me informe o número do documento e verifico para você.",
            Some("contas_receber") => "Sobre cobranças: me informe o número do documento e verifico para você.",
            Some("rh") => "Que bom que quer falar com nosso RH! Me conte qual vaga ou assunto te interessa.",
            _ => "Olá! Sou o assistente virtual. Como posso ajudar? Se preferir, peça para falar com um atendente.",
        };

        Ok(BotReply {
            response: response.to_string(),
            intent: intent.map(str::to_string).or(Some("geral".to_string())),
            needs_human: false,
        })
    }
}
