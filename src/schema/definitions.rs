//! Hand-authored description of what the application tables should look like
//! once every bundled migration has been applied. Compared against the live
//! database, never derived from it.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpectedColumn {
    pub name: &'static str,
    pub column_type: &'static str,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpectedForeignKey {
    pub from_column: &'static str,
    pub target_table: &'static str,
    pub target_column: &'static str,
    pub on_delete: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpectedIndex {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub table: &'static str,
    /// Migration version this definition corresponds to.
    pub version: u32,
    pub columns: &'static [ExpectedColumn],
    pub foreign_keys: &'static [ExpectedForeignKey],
    pub indexes: &'static [ExpectedIndex],
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ExpectedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

const fn column(
    name: &'static str,
    column_type: &'static str,
    not_null: bool,
    primary_key: bool,
) -> ExpectedColumn {
    ExpectedColumn {
        name,
        column_type,
        not_null,
        primary_key,
    }
}

pub const CONVERSATIONS: TableSchema = TableSchema {
    table: "conversations",
    version: 2,
    columns: &[
        column("id", "TEXT", true, true),
        column("title", "TEXT", true, false),
        column("created_at", "TEXT", true, false),
        column("updated_at", "TEXT", true, false),
    ],
    foreign_keys: &[],
    indexes: &[ExpectedIndex {
        name: "idx_conversations_updated_at",
        columns: &["updated_at"],
        unique: false,
    }],
};

pub const AGENTS: TableSchema = TableSchema {
    table: "agents",
    version: 2,
    columns: &[
        column("id", "TEXT", true, true),
        column("name", "TEXT", true, false),
        column("role", "TEXT", true, false),
        column("model", "TEXT", true, false),
        column("system_prompt", "TEXT", false, false),
        column("created_at", "TEXT", true, false),
    ],
    foreign_keys: &[],
    indexes: &[ExpectedIndex {
        name: "idx_agents_name",
        columns: &["name"],
        unique: true,
    }],
};

pub const MESSAGES: TableSchema = TableSchema {
    table: "messages",
    version: 2,
    columns: &[
        column("id", "TEXT", true, true),
        column("conversation_id", "TEXT", true, false),
        column("content", "TEXT", true, false),
        column("sender", "TEXT", true, false),
        column("sender_type", "TEXT", true, false),
        column("timestamp", "TEXT", true, false),
    ],
    foreign_keys: &[ExpectedForeignKey {
        from_column: "conversation_id",
        target_table: "conversations",
        target_column: "id",
        on_delete: "CASCADE",
    }],
    indexes: &[ExpectedIndex {
        name: "idx_messages_conversation_timestamp",
        columns: &["conversation_id", "timestamp"],
        unique: false,
    }],
};

pub const CONVERSATION_AGENTS: TableSchema = TableSchema {
    table: "conversation_agents",
    version: 2,
    columns: &[
        column("conversation_id", "TEXT", true, true),
        column("agent_id", "TEXT", true, true),
        column("added_at", "TEXT", true, false),
        column("display_order", "INTEGER", true, false),
    ],
    foreign_keys: &[
        ExpectedForeignKey {
            from_column: "conversation_id",
            target_table: "conversations",
            target_column: "id",
            on_delete: "CASCADE",
        },
        ExpectedForeignKey {
            from_column: "agent_id",
            target_table: "agents",
            target_column: "id",
            on_delete: "CASCADE",
        },
    ],
    indexes: &[ExpectedIndex {
        name: "idx_conversation_agents_agent_id",
        columns: &["agent_id"],
        unique: false,
    }],
};

/// Every table the application relies on, parents before children.
pub fn application_schemas() -> &'static [TableSchema] {
    &[CONVERSATIONS, AGENTS, MESSAGES, CONVERSATION_AGENTS]
}
