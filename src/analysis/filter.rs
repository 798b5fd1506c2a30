use crate::analysis::token::Token;

/// Post-tokenization transform applied in pipeline order.
pub trait TokenFilter: Send + Sync {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token>;

    fn name(&self) -> &str;
}
