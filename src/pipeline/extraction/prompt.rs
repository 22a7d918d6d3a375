use super::types::{DatapointSpec, FewShotExample, OutputMode};
use crate::pipeline::llm::ChatMessage;

pub const SINGLE_CALL_SYSTEM_PROMPT: &str = "You are an expert medical data extraction assistant. \
Extract the requested information accurately and return only valid JSON.";

pub const DATAPOINT_SYSTEM_PROMPT: &str = "You are an expert medical data extraction assistant.";

/// Characters of the instruction appended to a datapoint's retrieval query.
const QUERY_INSTRUCTION_CHARS: usize = 100;

/// One instruction covering every datapoint, listing all result keys.
pub fn build_combined_instruction(datapoints: &[DatapointSpec]) -> String {
    let instructions = datapoints
        .iter()
        .map(|dp| format!("**{}**: {}", dp.result_key, dp.instruction))
        .collect::<Vec<_>>()
        .join("\n");
    let keys = datapoints
        .iter()
        .map(|dp| dp.result_key.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Extract the following data points from the clinical text:\n\n\
         {instructions}\n\n\
         Return a single JSON object with all keys: {keys}\n\
         Do not include any additional commentary. Provide only the JSON."
    )
}

fn example_messages(examples: &[FewShotExample]) -> impl Iterator<Item = ChatMessage> + '_ {
    examples
        .iter()
        .map(|ex| ChatMessage::new(ex.role, ex.content.clone()))
}

fn task_message(context: &str, instruction: &str) -> ChatMessage {
    ChatMessage::user(format!("Context:\n{context}\n\nTask: {instruction}"))
}

/// System prompt, every datapoint's few-shots in configured order, then
/// the combined task.
pub fn build_single_call_messages(context: &str, datapoints: &[DatapointSpec]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SINGLE_CALL_SYSTEM_PROMPT)];
    for dp in datapoints {
        messages.extend(example_messages(&dp.few_shot_examples));
    }
    messages.push(task_message(context, &build_combined_instruction(datapoints)));
    messages
}

/// A self-contained conversation for one datapoint.
pub fn build_datapoint_messages(context: &str, datapoint: &DatapointSpec) -> Vec<ChatMessage> {
    let system = datapoint
        .system_message
        .as_deref()
        .unwrap_or(DATAPOINT_SYSTEM_PROMPT);

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(example_messages(&datapoint.few_shot_examples));

    let instruction = match datapoint.output_mode {
        OutputMode::Json => format!(
            "{}\n\nReturn a JSON object with the single key \"{}\".",
            datapoint.instruction, datapoint.result_key
        ),
        OutputMode::Text => datapoint.instruction.clone(),
    };
    messages.push(task_message(context, &instruction));
    messages
}

/// Retrieval query for one datapoint: its name plus the start of its instruction.
pub fn build_datapoint_query(datapoint: &DatapointSpec) -> String {
    let prefix: String = datapoint
        .instruction
        .chars()
        .take(QUERY_INSTRUCTION_CHARS)
        .collect();
    format!("{} {}", datapoint.name, prefix)
}
