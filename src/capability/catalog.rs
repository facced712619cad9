//! Built-in tool catalog and per-agent allow-lists.

use serde_json::json;

use crate::capability::tool::{AgentType, RegisteredTool, ToolHandler};

/// Tools each agent type may call. Every agent type has exactly one entry.
pub const BUILTIN_GRANTS: &[(AgentType, &[&str])] = &[
    (AgentType::BugReporter, &[]),
    (
        AgentType::GithubMaintainer,
        &[
            "create_github_issue",
            "comment_on_issue",
            "list_pull_requests",
            "merge_pull_request",
        ],
    ),
    (
        AgentType::CodeReviewer,
        &["comment_on_issue", "list_pull_requests", "review_pull_request"],
    ),
    (
        AgentType::WalletMonitor,
        &["get_wallet_balance", "get_token_price", "send_telegram_message"],
    ),
    (
        AgentType::Trader,
        &[
            "get_wallet_balance",
            "get_token_price",
            "send_transaction",
            "swap_tokens",
        ],
    ),
    (
        AgentType::Notifier,
        &["send_telegram_message", "trigger_webhook"],
    ),
];

/// Every tool the platform knows about, in registry order.
pub fn builtin_tools() -> Vec<RegisteredTool> {
    vec![
        RegisteredTool::new(
            "create_github_issue",
            "Open a new issue in a GitHub repository.",
            json!({
                "type": "object",
                "properties": {
                    "repo": {
                        "type": "string",
                        "description": "Repository in owner/name form"
                    },
                    "title": { "type": "string" },
                    "body": { "type": "string" },
                    "labels": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "required": ["repo", "title"]
            }),
            ToolHandler::new("github", "issues", "create_issue"),
        ),
        RegisteredTool::new(
            "comment_on_issue",
            "Add a comment to an issue or pull request.",
            json!({
                "type": "object",
                "properties": {
                    "repo": { "type": "string" },
                    "number": { "type": "integer" },
                    "body": { "type": "string" }
                },
                "required": ["repo", "number", "body"]
            }),
            ToolHandler::new("github", "issues", "create_comment"),
        ),
        RegisteredTool::new(
            "list_pull_requests",
            "List open pull requests in a repository.",
            json!({
                "type": "object",
                "properties": {
                    "repo": { "type": "string" },
                    "state": {
                        "type": "string",
                        "enum": ["open", "closed", "all"]
                    }
                },
                "required": ["repo"]
            }),
            ToolHandler::new("github", "pulls", "list"),
        ),
        RegisteredTool::new(
            "review_pull_request",
            "Submit a review on a pull request.",
            json!({
                "type": "object",
                "properties": {
                    "repo": { "type": "string" },
                    "number": { "type": "integer" },
                    "event": {
                        "type": "string",
                        "enum": ["APPROVE", "REQUEST_CHANGES", "COMMENT"]
                    },
                    "body": { "type": "string" }
                },
                "required": ["repo", "number", "event"]
            }),
            ToolHandler::new("github", "pulls", "create_review"),
        ),
        RegisteredTool::new(
            "merge_pull_request",
            "Merge a pull request that has passed review.",
            json!({
                "type": "object",
                "properties": {
                    "repo": { "type": "string" },
                    "number": { "type": "integer" },
                    "method": {
                        "type": "string",
                        "enum": ["merge", "squash", "rebase"]
                    }
                },
                "required": ["repo", "number"]
            }),
            ToolHandler::new("github", "pulls", "merge"),
        ),
        RegisteredTool::new(
            "get_wallet_balance",
            "Read the native and token balances of a wallet address.",
            json!({
                "type": "object",
                "properties": {
                    "address": { "type": "string" },
                    "chain": {
                        "type": "string",
                        "description": "Chain name, e.g. ethereum or base"
                    }
                },
                "required": ["address"]
            }),
            ToolHandler::new("wallet", "evm", "get_balance"),
        ),
        RegisteredTool::new(
            "get_token_price",
            "Fetch the current USD price of a token.",
            json!({
                "type": "object",
                "properties": {
                    "symbol": { "type": "string" }
                },
                "required": ["symbol"]
            }),
            ToolHandler::new("wallet", "prices", "get_price"),
        ),
        RegisteredTool::new(
            "send_transaction",
            "Sign and broadcast a native-token transfer from the agent wallet.",
            json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string" },
                    "amount": {
                        "type": "string",
                        "description": "Decimal amount in the chain's native unit"
                    },
                    "chain": { "type": "string" }
                },
                "required": ["to", "amount"]
            }),
            ToolHandler::new("wallet", "evm", "send_transaction"),
        ),
        RegisteredTool::new(
            "swap_tokens",
            "Swap one token for another through the configured DEX router.",
            json!({
                "type": "object",
                "properties": {
                    "from_token": { "type": "string" },
                    "to_token": { "type": "string" },
                    "amount": { "type": "string" },
                    "max_slippage_bps": { "type": "integer" }
                },
                "required": ["from_token", "to_token", "amount"]
            }),
            ToolHandler::new("wallet", "dex", "swap"),
        ),
        RegisteredTool::new(
            "send_telegram_message",
            "Send a message to the agent owner's linked Telegram chat.",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            }),
            ToolHandler::new("telegram", "bot", "send_message"),
        ),
        RegisteredTool::new(
            "trigger_webhook",
            "Deliver a JSON payload to one of the owner's registered webhooks.",
            json!({
                "type": "object",
                "properties": {
                    "webhook_id": { "type": "string" },
                    "payload": { "type": "object" }
                },
                "required": ["webhook_id", "payload"]
            }),
            ToolHandler::new("webhooks", "outbound", "deliver"),
        ),
    ]
}
