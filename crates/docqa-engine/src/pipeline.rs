//! Question answering over one document: retrieve a context per question,
//! then ask the generator for each answer in question order.

use serde::{Deserialize, Serialize};

use docqa_core::{AnswerGenerator, DocumentSource, Error, Result};

use crate::engine::QueryEngine;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub context: String,
    pub answer: String,
}

/// Any retrieval or generation failure fails the whole call.
pub async fn answer_questions(
    engine: &QueryEngine,
    generator: &dyn AnswerGenerator,
    document_text: &str,
    questions: &[String],
) -> Result<Vec<Answer>> {
    let contexts = engine.retrieve_contexts(document_text, questions).await?;
    let limit = engine.config().timeout();
    let mut answers = Vec::with_capacity(questions.len());
    for (question, context) in questions.iter().zip(contexts) {
        let answer = tokio::time::timeout(limit, generator.generate_answer(&context, question))
            .await
            .map_err(|_| Error::Timeout(format!("answer generation exceeded {}s", limit.as_secs())))??;
        answers.push(Answer { question: question.clone(), context, answer });
    }
    tracing::debug!(answers = answers.len(), "answered questions");
    Ok(answers)
}

/// Fetch `location` through `source`, then answer as [`answer_questions`].
pub async fn answer_from_source(
    engine: &QueryEngine,
    source: &dyn DocumentSource,
    generator: &dyn AnswerGenerator,
    location: &str,
    questions: &[String],
) -> Result<Vec<Answer>> {
    let limit = engine.config().timeout();
    let text = tokio::time::timeout(limit, source.fetch(location))
        .await
        .map_err(|_| Error::Timeout(format!("fetching {location} exceeded {}s", limit.as_secs())))??;
    answer_questions(engine, generator, &text, questions).await
}
