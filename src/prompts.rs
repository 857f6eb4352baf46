//! Embedded prompt templates.
//!
//! Every model call in the pipeline goes through a named template with
//! `{{variable}}` placeholders. The provider is a seam so callers can swap
//! the built-in prompts for their own.

/// Prompt identifiers, one per model call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptName {
    WriteSql,
    ExtractTableName,
    ExplainTable,
    AgentDescription,
    AgentName,
    AgentInstructions,
    ImpliedQuestions,
    FinalAnswer,
}

pub trait PromptProvider: Send + Sync {
    fn read_prompt(&self, name: PromptName) -> &str;
}

/// The built-in prompt set.
pub struct EmbeddedPrompts;

impl PromptProvider for EmbeddedPrompts {
    fn read_prompt(&self, name: PromptName) -> &str {
        match name {
            PromptName::WriteSql => WRITE_SQL,
            PromptName::ExtractTableName => EXTRACT_TABLE_NAME,
            PromptName::ExplainTable => EXPLAIN_TABLE,
            PromptName::AgentDescription => AGENT_DESCRIPTION,
            PromptName::AgentName => AGENT_NAME,
            PromptName::AgentInstructions => AGENT_INSTRUCTIONS,
            PromptName::ImpliedQuestions => IMPLIED_QUESTIONS,
            PromptName::FinalAnswer => FINAL_ANSWER,
        }
    }
}

/// Substitute `{{key}}` placeholders. Unknown placeholders are left in place
/// so a missing variable shows up verbatim in the rendered prompt.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

const WRITE_SQL: &str = r#"You are an expert {{providerName}} engineer. Translate the request below
into a single SQL query that runs on {{providerName}} without modification.

Known table definitions (may be empty):
{{tablesDefinition}}

Request: {{prompt}}

A previous attempt and the error it produced may be provided. When present,
correct the query instead of repeating the same mistake.

Previous attempt: {{previousAttempt}}
Previous error: {{previousException}}

Respond with a JSON object:
{
  "comments": ["assumptions made while translating the request, and any syntax choices specific to {{providerName}}"],
  "query": "the SQL query"
}

Return only the JSON object, no other text."#;

const EXTRACT_TABLE_NAME: &str = r#"The following block is one row from a listing of all tables in a database:

{{item}}

Extract the canonical name of the table this row refers to. Use the fully
qualified name (schema.table) only when the row includes a schema.

Respond with a JSON object:
{
  "thinking": "how you identified the name",
  "tableName": "the table name"
}

Return only the JSON object, no other text."#;

const EXPLAIN_TABLE: &str = r#"You are documenting the table `{{tableName}}` of a {{providerName}} database.

Structure:
{{tableDefinition}}

Sample rows:
{{tableDataExtract}}

Write documentation a data analyst could work from:
- "definition": one or two sentences stating what the table contains and what
  each row represents.
- "attributes": a Markdown bullet list describing every column and its meaning.
- "relations": a Markdown bullet list of likely foreign keys and the tables
  they point to, inferred from column names and sample values. Use "None
  identified." when nothing plausible is found.

Respond with a JSON object:
{
  "definition": "...",
  "attributes": "...",
  "relations": "..."
}

Return only the JSON object, no other text."#;

const AGENT_DESCRIPTION: &str = r#"An assistant answers natural-language questions by querying a database with
the following tables:

{{tableDefinitions}}

Preferred assistant name, possibly empty: {{expectedName}}

Write a short third-person description of that assistant: the domain it
covers, the kind of questions it can answer, and the data it relies on.

Respond with a JSON object:
{
  "description": "..."
}

Return only the JSON object, no other text."#;

const AGENT_NAME: &str = r#"Here is the description of an assistant:

{{agentDescription}}

Propose a short, memorable name for it. Letters, digits and underscores only.

Respond with a JSON object:
{
  "name": "..."
}

Return only the JSON object, no other text."#;

const AGENT_INSTRUCTIONS: &str = r#"Here is the description of an assistant that answers questions by querying a
database:

{{agentDescription}}

Write the system instructions for that assistant. The instructions should
tell it to ground every answer in the query results it is given, to answer
the question explicitly, and to say so when the results do not contain the
answer.

Respond with a JSON object:
{
  "instructions": "..."
}

Return only the JSON object, no other text."#;

const IMPLIED_QUESTIONS: &str = r#"Given these table definitions:

{{tablesDefinition}}

And this SQL query:

{{query}}

List the natural-language questions this query actually answers. Phrase each
as a user would ask it.

Respond with a JSON object:
{
  "questions": ["...", "..."]
}

Return only the JSON object, no other text."#;

const FINAL_ANSWER: &str = r#"{{instructions}}

The database returned the following result:

{{data}}

Question: {{question}}

Respond with a JSON object:
{
  "thinking": "your step-by-step reasoning over the query result",
  "answer": "your final answer in natural language, addressing the question explicitly"
}

Example:

_Question_: What is the capital of France?
_Query result_:
| Country | Capital |
| --- | --- |
| France | Paris |
| Germany | Berlin |

_Output_:
{
  "thinking": "The row for France lists 'Paris' in the Capital column.",
  "answer": "The capital of France is Paris."
}

Return only the JSON object, no other text."#;
