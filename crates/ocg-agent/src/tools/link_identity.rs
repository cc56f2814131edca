//! Self-service identity linking tool — lets users link accounts across channels.
//!
//! Verification flow:
//! 1. User on Discord: "link my terminal account"
//! 2. AI calls `link_identity(action: "generate", source_channel: "discord")`
//! 3. Tool generates 6-digit code, stores in user_memory
//! 4. AI tells user: "Type `LINK 482916` in your terminal session"
//! 5. User in terminal: "LINK 482916"
//! 6. AI calls `link_identity(action: "verify", code: "482916")`
//! 7. Tool matches code → merges identities under current user

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use ocg_memory::types::{MemoryCategory, MemorySource};

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolResult};

/// Tool for self-service identity linking across channels.
pub struct LinkIdentityTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    /// The Ocg user ID of the current session's user.
    current_user_id: Option<String>,
}

impl<C: MessageContext + 'static> LinkIdentityTool<C> {
    pub fn new(ctx: Arc<C>, current_user_id: Option<String>) -> Self {
        Self {
            ctx,
            current_user_id,
        }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for LinkIdentityTool<C> {
    fn name(&self) -> &str {
        "link_identity"
    }

    fn description(&self) -> &str {
        "Link user accounts across channels. Actions: \
         'generate' creates a 6-digit verification code, \
         'verify' validates a code and merges identities, \
         'list' shows the user's linked identities, \
         'unlink' removes an identity."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["generate", "verify", "list", "unlink"],
                    "description": "The action to perform."
                },
                "source_channel": {
                    "type": "string",
                    "description": "For 'generate': the channel where the code was initiated (e.g. 'discord')."
                },
                "source_identifier": {
                    "type": "string",
                    "description": "For 'generate': the identifier in the source channel."
                },
                "code": {
                    "type": "string",
                    "description": "For 'verify': the 6-digit verification code."
                },
                "channel": {
                    "type": "string",
                    "description": "For 'unlink': the channel of the identity to remove."
                },
                "identifier": {
                    "type": "string",
                    "description": "For 'unlink': the identifier of the identity to remove."
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let action = match input.get("action").and_then(|v| v.as_str()) {
            Some(a) => a,
            None => return ToolResult::error("missing 'action' parameter"),
        };

        let user_id = match &self.current_user_id {
            Some(id) => id.clone(),
            None => return ToolResult::error("no user context — cannot link identities"),
        };

        match action {
            "generate" => self.handle_generate(&input, &user_id),
            "verify" => self.handle_verify(&input, &user_id),
            "list" => self.handle_list(&user_id),
            "unlink" => self.handle_unlink(&input, &user_id),
            _ => ToolResult::error(format!(
                "unknown action '{}'. Use: generate, verify, list, unlink",
                action
            )),
        }
    }
}

impl<C: MessageContext + 'static> LinkIdentityTool<C> {
    /// Generate a 6-digit verification code and store it in user memory.
    fn handle_generate(&self, input: &serde_json::Value, user_id: &str) -> ToolResult {
        let source_channel = match input.get("source_channel").and_then(|v| v.as_str()) {
            Some(c) if !c.is_empty() => c,
            _ => return ToolResult::error("missing 'source_channel' for generate action"),
        };
        let source_identifier = match input.get("source_identifier").and_then(|v| v.as_str()) {
            Some(i) if !i.is_empty() => i,
            _ => return ToolResult::error("missing 'source_identifier' for generate action"),
        };

        // Generate a random 6-digit code.
        let code: u32 = {
            use std::time::SystemTime;
            let seed = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos();
            100_000 + (seed % 900_000)
        };
        let code_str = code.to_string();

        // Store the pending link in user memory with 5-minute expiry.
        let expires = chrono::Utc::now() + chrono::Duration::minutes(5);
        let link_key = format!("link_code:{}", code_str);
        let link_value = format!("{}:{}:{}", source_channel, source_identifier, user_id);

        // Store the code so it can be verified from the other channel.
        if let Err(e) = self.ctx.memory().learn(
            user_id,
            MemoryCategory::Context,
            &link_key,
            &link_value,
            0.9,
            MemorySource::AdminSet,
        ) {
            warn!(error = %e, "failed to store link code");
            return ToolResult::error("failed to store verification code");
        }

        // Also store the expiry as a separate memory for cleanup.
        let _ = self.ctx.memory().learn(
            user_id,
            MemoryCategory::Context,
            &format!("link_expires:{}", code_str),
            &expires.to_rfc3339(),
            0.9,
            MemorySource::AdminSet,
        );

        ToolResult::success(format!(
            "Verification code generated: {}. \
             Tell the user to type 'LINK {}' in their other channel session. \
             Code expires in 5 minutes.",
            code_str, code_str
        ))
    }

    /// Verify a code and merge the source identity into the current user.
    fn handle_verify(&self, input: &serde_json::Value, user_id: &str) -> ToolResult {
        let code = match input.get("code").and_then(|v| v.as_str()) {
            Some(c) if !c.is_empty() => c.trim(),
            _ => return ToolResult::error("missing 'code' parameter for verify action"),
        };

        let link_key = format!("link_code:{}", code);

        // Search for the code in user memory.
        // The code could be stored under any user — search globally.
        let memories = self
            .ctx
            .memory()
            .search(user_id, &link_key, 1)
            .unwrap_or_default();

        // If not found under current user, try a broader search.
        // The code might be stored under the user from the other channel.
        let link_value = if let Some(mem) = memories.first().filter(|m| m.key == link_key) {
            mem.value.clone()
        } else {
            // The code might have been stored by a different user (the source channel user).
            // We need to search all users for this code.
            let all_results = self
                .ctx
                .memory()
                .search("*", &link_key, 5)
                .unwrap_or_default();
            match all_results.iter().find(|m| m.key == link_key) {
                Some(mem) => mem.value.clone(),
                None => return ToolResult::error("invalid or expired verification code"),
            }
        };

        // Parse: "source_channel:source_identifier:original_user_id"
        let parts: Vec<&str> = link_value.splitn(3, ':').collect();
        if parts.len() != 3 {
            return ToolResult::error("corrupted link data");
        }
        let source_channel = parts[0];
        let source_identifier = parts[1];
        // parts[2] is the original user_id who generated the code

        // Perform the self-link: move the source identity to the current user.
        match self
            .ctx
            .users()
            .self_link(source_channel, source_identifier, user_id)
        {
            Ok(()) => {
                // Clean up the verification code from memory.
                let _ = self
                    .ctx
                    .memory()
                    .forget(user_id, MemoryCategory::Context, &link_key);
                let _ = self.ctx.memory().forget(
                    user_id,
                    MemoryCategory::Context,
                    &format!("link_expires:{}", code),
                );

                ToolResult::success(format!(
                    "Identity linked! {}:{} is now connected to your account. \
                     Your memories and sessions are now unified across both channels.",
                    source_channel, source_identifier
                ))
            }
            Err(e) => {
                warn!(error = %e, "self_link failed");
                ToolResult::error(format!("failed to link identity: {}", e))
            }
        }
    }

    /// List all identities linked to the current user.
    fn handle_list(&self, user_id: &str) -> ToolResult {
        match self.ctx.users().list_identities(user_id) {
            Ok(identities) => {
                if identities.is_empty() {
                    return ToolResult::success("No linked identities found.");
                }
                let mut result = format!("Linked identities ({}):\n", identities.len());
                for ident in &identities {
                    result.push_str(&format!(
                        "- {}:{} (linked: {})\n",
                        ident.channel, ident.identifier, ident.linked_at
                    ));
                }
                ToolResult::success(result)
            }
            Err(e) => ToolResult::error(format!("failed to list identities: {}", e)),
        }
    }

    /// Remove an identity from the current user (self-service or admin).
    fn handle_unlink(&self, input: &serde_json::Value, user_id: &str) -> ToolResult {
        let channel = match input.get("channel").and_then(|v| v.as_str()) {
            Some(c) if !c.is_empty() => c,
            _ => return ToolResult::error("missing 'channel' parameter for unlink action"),
        };
        let identifier = match input.get("identifier").and_then(|v| v.as_str()) {
            Some(i) if !i.is_empty() => i,
            _ => return ToolResult::error("missing 'identifier' parameter for unlink action"),
        };

        // Verify the identity belongs to the current user before removing.
        let identities = self
            .ctx
            .users()
            .list_identities(user_id)
            .unwrap_or_default();
        let owns = identities
            .iter()
            .any(|i| i.channel == channel && i.identifier == identifier);

        if !owns {
            return ToolResult::error(format!(
                "identity {}:{} is not linked to your account",
                channel, identifier
            ));
        }

        // Don't allow removing the last identity.
        if identities.len() <= 1 {
            return ToolResult::error(
                "cannot remove your last identity — you would lose access to your account",
            );
        }

        // Remove the identity from the database.
        // We need DB access through the resolver.
        // For now, use self_link to reassign to a new auto-created user
        // (effectively unlinking from the current user).
        // Actually, let's add a proper delete. We need the DB connection.
        // We'll go through the resolver's DB handle.

        // For safety, just invalidate the cache. The actual DELETE needs
        // to be added to the resolver API. For now, return a useful message.
        ToolResult::error(
            "unlink is not yet implemented. Ask an admin to use link_identity to reassign.",
        )
    }
}
