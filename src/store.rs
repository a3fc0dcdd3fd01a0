//! Conversations, agents and messages. Every multi-statement operation here
//! runs as one unit through the transaction manager.

use crate::error::StoreError;
use crate::transaction::TransactionManager;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Agent,
    System,
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SenderType::User => "user",
            SenderType::Agent => "agent",
            SenderType::System => "system",
        };
        f.write_str(s)
    }
}

impl FromStr for SenderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SenderType::User),
            "agent" => Ok(SenderType::Agent),
            "system" => Ok(SenderType::System),
            other => Err(format!("unknown sender type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub role: String,
    pub model: String,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sender: String,
    pub sender_type: SenderType,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub sender: String,
    pub sender_type: SenderType,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        role: row.get(2)?,
        model: row.get(3)?,
        system_prompt: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let sender_type: String = row.get(4)?;
    let sender_type = sender_type.parse::<SenderType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        content: row.get(2)?,
        sender: row.get(3)?,
        sender_type,
        timestamp: row.get(5)?,
    })
}

fn conversation_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM conversations WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

pub struct ConversationStore {
    manager: Arc<TransactionManager>,
}

impl ConversationStore {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager }
    }

    pub fn create_agent(&self, agent: NewAgent) -> Result<Agent, StoreError> {
        let agent = Agent {
            id: Uuid::new_v4().to_string(),
            name: agent.name,
            role: agent.role,
            model: agent.model,
            system_prompt: agent.system_prompt,
            created_at: now(),
        };

        self.manager.execute_immediate_transaction(|conn| {
            conn.execute(
                "INSERT INTO agents (id, name, role, model, system_prompt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    agent.id,
                    agent.name,
                    agent.role,
                    agent.model,
                    agent.system_prompt,
                    agent.created_at
                ],
            )?;
            Ok::<_, StoreError>(())
        })?;

        debug!("Created agent {} ({})", agent.name, agent.id);
        Ok(agent)
    }

    /// Create a conversation with the given agents attached, in that order.
    /// An unknown agent id aborts the whole creation.
    pub fn create_conversation(
        &self,
        title: &str,
        agent_ids: &[String],
    ) -> Result<Conversation, StoreError> {
        let timestamp = now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };

        self.manager.execute_immediate_transaction(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    conversation.id,
                    conversation.title,
                    conversation.created_at,
                    conversation.updated_at
                ],
            )?;

            for (position, agent_id) in agent_ids.iter().enumerate() {
                let known = conn
                    .query_row("SELECT 1 FROM agents WHERE id = ?1", params![agent_id], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !known {
                    return Err(StoreError::AgentNotFound(agent_id.clone()));
                }

                conn.execute(
                    "INSERT INTO conversation_agents (conversation_id, agent_id, added_at, display_order)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![conversation.id, agent_id, conversation.created_at, position as i64],
                )?;
            }
            Ok(())
        })?;

        info!("Created conversation {} with {} agents", conversation.id, agent_ids.len());
        Ok(conversation)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        self.manager.execute_read_only_transaction(|conn| {
            conn.query_row(
                "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
                params![id],
                conversation_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub fn conversation_agents(&self, conversation_id: &str) -> Result<Vec<Agent>, StoreError> {
        self.manager.execute_read_only_transaction(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.name, a.role, a.model, a.system_prompt, a.created_at
                 FROM agents a
                 JOIN conversation_agents ca ON ca.agent_id = a.id
                 WHERE ca.conversation_id = ?1
                 ORDER BY ca.display_order",
            )?;
            let agents = stmt
                .query_map(params![conversation_id], agent_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(agents)
        })
    }

    /// Insert messages and bump the conversation's `updated_at`, together.
    pub fn append_messages(
        &self,
        conversation_id: &str,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<Message>, StoreError> {
        let timestamp = now();
        let messages: Vec<Message> = messages
            .into_iter()
            .map(|m| Message {
                id: Uuid::new_v4().to_string(),
                conversation_id: conversation_id.to_string(),
                content: m.content,
                sender: m.sender,
                sender_type: m.sender_type,
                timestamp: timestamp.clone(),
            })
            .collect();

        self.manager.execute_immediate_transaction(|conn| {
            if !conversation_exists(conn, conversation_id)? {
                return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
            }

            let mut insert = conn.prepare(
                "INSERT INTO messages (id, conversation_id, content, sender, sender_type, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for message in &messages {
                insert.execute(params![
                    message.id,
                    message.conversation_id,
                    message.content,
                    message.sender,
                    message.sender_type.to_string(),
                    message.timestamp
                ])?;
            }

            conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![timestamp, conversation_id],
            )?;
            Ok(())
        })?;

        debug!("Appended {} messages to conversation {}", messages.len(), conversation_id);
        Ok(messages)
    }

    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        self.manager.execute_read_only_transaction(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, content, sender, sender_type, timestamp
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY timestamp, rowid",
            )?;
            let messages = stmt
                .query_map(params![conversation_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    /// Delete a conversation. Its messages and agent associations go with it
    /// through the ON DELETE CASCADE foreign keys.
    pub fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        self.manager.execute_immediate_transaction(|conn| {
            let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(StoreError::ConversationNotFound(id.to_string()));
            }
            Ok(())
        })?;

        info!("Deleted conversation {}", id);
        Ok(())
    }
}
