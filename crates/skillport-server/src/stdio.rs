//! Local pipe transport: one JSON request per line on stdin, one JSON
//! response per line on stdout.
//!
//! Requests are `{"id"?, "tool", "arguments"}` or `{"id"?, "method": "list_tools"}`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use skillport_core::tool_registry::ToolRegistry;
use skillport_core::types::ToolOutput;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct StdioRequest {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Echo the request id back unchanged so clients can match by JSON value.
fn with_id(mut response: Value, id: Option<Value>) -> Value {
    if let (Some(id), Value::Object(map)) = (id.filter(|id| !id.is_null()), &mut response) {
        map.insert("id".to_string(), id);
    }
    response
}

/// Serve the registry over the process's stdin and stdout until EOF.
pub async fn serve_stdio(registry: Arc<ToolRegistry>) -> anyhow::Result<()> {
    info!("Serving {} tools over stdio", registry.len());
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    run_lines(&registry, stdin, stdout).await?;
    info!("stdin closed, stopping");
    Ok(())
}

/// Process JSON-line requests from `reader`, writing one response line each.
pub async fn run_lines<R, W>(registry: &ToolRegistry, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = handle_line(registry, line).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn handle_line(registry: &ToolRegistry, line: &str) -> Value {
    let request: StdioRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return output_value(ToolOutput::error(None, format!("Error: invalid request: {}", e))),
    };
    let id = request.id;

    if let Some(method) = request.method.as_deref() {
        let response = match method {
            "list_tools" => serde_json::json!({ "tools": registry.schemas() }),
            other => output_value(ToolOutput::error(None, format!("Error: unknown method '{}'", other))),
        };
        return with_id(response, id);
    }

    let Some(tool) = request.tool else {
        return with_id(
            output_value(ToolOutput::error(None, "Error: request needs 'tool' or 'method'")),
            id,
        );
    };
    debug!("stdio tool call: {}", tool);
    let args = request
        .arguments
        .unwrap_or_else(|| Value::Object(Default::default()));
    with_id(output_value(registry.execute(&tool, None, args).await), id)
}

fn output_value(output: ToolOutput) -> Value {
    serde_json::to_value(output).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillport_core::EmbeddingProvider;
    use skillport_skills::{SearchService, SkillIndex, SkillLoader, SkillRepository};
    use skillport_tools::{registry_for, SkillContext, Transport};
    use tempfile::TempDir;

    async fn stdio_registry() -> (TempDir, ToolRegistry) {
        let tmp = TempDir::new().unwrap();
        let repository = SkillRepository::new(tmp.path());
        repository.seed_builtin().unwrap();
        let index = Arc::new(SkillIndex::new(
            repository.clone(),
            Arc::new(EmbeddingProvider::disabled()),
        ));
        index.rebuild().await.unwrap();
        let ctx = SkillContext::new(SearchService::new(index), SkillLoader::new(repository));
        (tmp, registry_for(ctx, Transport::Stdio))
    }

    async fn run(registry: &ToolRegistry, input: &str) -> Vec<Value> {
        let mut out = Vec::new();
        run_lines(registry, input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_list_tools_over_stdio() {
        let (_tmp, registry) = stdio_registry().await;
        let responses = run(&registry, "{\"id\": 1, \"method\": \"list_tools\"}\n").await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 1);
        let names: Vec<_> = responses[0]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["load_skill", "search_skills"]);
    }

    #[tokio::test]
    async fn test_tool_calls_over_stdio() {
        let (_tmp, registry) = stdio_registry().await;
        let input = concat!(
            "{\"id\": \"a\", \"tool\": \"search_skills\", \"arguments\": {\"query\": \"hello\"}}\n",
            "\n",
            "{\"id\": \"b\", \"tool\": \"load_skill\", \"arguments\": {\"skill_id\": \"hello-world\"}}\n",
            "{\"id\": \"c\", \"tool\": \"load_skill\", \"arguments\": {\"skill_id\": \"nonexistent\"}}\n",
            "{\"tool\": \"read_skill_file\", \"arguments\": {\"skill_id\": \"hello-world\", \"path\": \"SKILL.md\"}}\n",
        );
        let responses = run(&registry, input).await;
        assert_eq!(responses.len(), 4);

        assert_eq!(responses[0]["id"], "a");
        assert_eq!(responses[0]["is_error"], false);
        assert_eq!(responses[0]["content"][0]["type"], "text");
        assert!(responses[0]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("hello-world"));

        assert_eq!(responses[1]["is_error"], false);
        assert!(responses[1]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("# Hello World"));

        assert_eq!(responses[2]["is_error"], true);
        assert!(responses[2]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Skill not found"));

        assert_eq!(responses[3]["is_error"], true);
        assert!(responses[3].get("id").is_none());
    }

    #[tokio::test]
    async fn test_request_ids_are_echoed_verbatim() {
        let (_tmp, registry) = stdio_registry().await;
        let input = concat!(
            "{\"id\": 7, \"tool\": \"search_skills\", \"arguments\": {\"query\": \"hello\"}}\n",
            "{\"id\": \"7\", \"tool\": \"load_skill\", \"arguments\": {}}\n",
            "{\"id\": {\"seq\": 2}, \"method\": \"shutdown\"}\n",
            "{\"id\": null, \"method\": \"list_tools\"}\n",
        );
        let responses = run(&registry, input).await;
        assert_eq!(responses.len(), 4);

        assert_eq!(responses[0]["id"], serde_json::json!(7));
        assert_eq!(responses[1]["id"], serde_json::json!("7"));
        assert_eq!(responses[1]["is_error"], true);
        assert_eq!(responses[2]["id"], serde_json::json!({"seq": 2}));
        assert!(responses[3].get("id").is_none());
    }

    #[tokio::test]
    async fn test_malformed_lines_get_error_responses() {
        let (_tmp, registry) = stdio_registry().await;
        let responses = run(&registry, "not json\n{\"method\": \"shutdown\"}\n{}\n").await;
        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| r["is_error"] == true));
    }
}
