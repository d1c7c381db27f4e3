//! Agent turn: load the sender's history, generate the reply for the routed strategy,
//! append the (human, assistant) pair.

use crate::llm::LlmError;
use crate::rag::RagService;
use crate::routing::{self, RoutingAnalysis, Strategy};
use crate::session::{SessionMemory, Turn};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on one retrieval + generation call.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Chooses the retrieval query for a strategy and post-processes the answer.
#[derive(Clone)]
pub struct ResponseGenerator {
    rag: Arc<dyn RagService>,
    timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(rag: Arc<dyn RagService>, timeout: Duration) -> Self {
        Self { rag, timeout }
    }

    async fn answer(&self, query: &str, history: &[Turn]) -> Result<String, LlmError> {
        tokio::time::timeout(self.timeout, self.rag.answer(query, history))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))?
    }

    /// Reply text for `message`. Consultant messages are answered through a synthesized
    /// "similar listings" query and wrapped in the consultant template; everything else
    /// is answered directly.
    pub async fn generate(
        &self,
        message: &str,
        analysis: &RoutingAnalysis,
        history: &[Turn],
    ) -> Result<String, LlmError> {
        match (&analysis.strategy, &analysis.extracted_info) {
            (Strategy::Consultant, Some(info)) => {
                let query = routing::generate_query(message, info);
                log::info!("agent: consultant query: {}", query);
                let raw = self.answer(&query, history).await?;
                Ok(routing::format_consultant_reply(&raw, info))
            }
            _ => self.answer(message, history).await,
        }
    }
}

/// Run one turn for `sender`: read history, generate, then append the new pair.
/// History is left untouched when generation fails.
pub async fn run_turn(
    memory: &SessionMemory,
    generator: &ResponseGenerator,
    sender: &str,
    message: &str,
    analysis: &RoutingAnalysis,
) -> Result<String, LlmError> {
    let history = memory.get_history(sender).await;
    log::debug!("agent: {} prior turns for {}", history.len(), sender);
    let reply = generator.generate(message, analysis, &history).await?;
    memory
        .append(sender, &[Turn::human(message), Turn::assistant(reply.clone())])
        .await;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::LinkRouter;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRag {
        queries: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl RagService for RecordingRag {
        async fn answer(&self, query: &str, history: &[Turn]) -> Result<String, LlmError> {
            self.queries
                .lock()
                .unwrap()
                .push((query.to_string(), history.len()));
            Ok("Tenemos la Casa Lagos del Sol.".to_string())
        }
    }

    struct SlowRag;

    #[async_trait]
    impl RagService for SlowRag {
        async fn answer(&self, _: &str, _: &[Turn]) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("tarde".to_string())
        }
    }

    fn memory() -> SessionMemory {
        SessionMemory::new(Arc::new(MemoryStore::new()), 20, None)
    }

    #[tokio::test]
    async fn direct_turn_appends_pair_in_order() {
        let rag = Arc::new(RecordingRag::default());
        let generator = ResponseGenerator::new(rag.clone(), DEFAULT_REPLY_TIMEOUT);
        let mem = memory();
        let router = LinkRouter::default();

        for msg in ["Hola", "¿Tienen casas en Cancún?"] {
            run_turn(&mem, &generator, "s", msg, &router.analyze(msg)).await.unwrap();
        }
        let history = mem.get_history("s").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], Turn::human("¿Tienen casas en Cancún?"));
        // second call saw the first pair
        assert_eq!(rag.queries.lock().unwrap()[1], ("¿Tienen casas en Cancún?".to_string(), 2));
    }

    #[tokio::test]
    async fn consultant_turn_uses_smart_query_and_template() {
        let rag = Arc::new(RecordingRag::default());
        let generator = ResponseGenerator::new(rag.clone(), DEFAULT_REPLY_TIMEOUT);
        let msg = "https://www.inmuebles24.com/propiedades/clasificado/veclcapa-hermosa-casa-en-residencial-rio-cancun-146144201.html";
        let analysis = LinkRouter::default().analyze(msg);

        let reply = generator.generate(msg, &analysis, &[]).await.unwrap();
        assert!(reply.starts_with("¡Hola! Vi que te interesa una casa de Inmuebles24."));
        assert!(reply.contains("Tenemos la Casa Lagos del Sol."));
        assert!(rag.queries.lock().unwrap()[0].0.starts_with("¿Qué casas en Residencial Rio"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_answer_times_out_without_touching_history() {
        let generator = ResponseGenerator::new(Arc::new(SlowRag), Duration::from_secs(1));
        let mem = memory();
        let analysis = LinkRouter::default().analyze("hola");
        let err = run_turn(&mem, &generator, "s", "hola", &analysis).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
        assert!(mem.get_history("s").await.is_empty());
    }
}
