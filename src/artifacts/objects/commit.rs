//! Git commit object
//!
//! Commits represent snapshots of the repository at specific points in time.
//! They contain:
//! - A tree object ID (directory snapshot)
//! - Parent commit ID(s) (zero for the initial commit, several for merges)
//! - Author and committer information
//! - An optional `encoding` header naming the message charset
//! - Commit message
//!
//! ## Format
//!
//! On disk:
//! ```text
//! commit <size>\0
//! tree <tree-sha>
//! parent <parent-sha>
//! author <name> <email> <timestamp> <timezone>
//! committer <name> <email> <timestamp> <timezone>
//! encoding <charset>
//!
//! <commit message>
//! ```

use crate::artifacts::core::CoreError;
use crate::artifacts::objects::object::Unpackable;
use crate::artifacts::objects::object::{Object, Packable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bytes::Bytes;
use std::io::{BufRead, Write};

/// Author or committer information: name, email, and a timestamp with
/// timezone offset.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Author {
    name: String,
    email: String,
    timestamp: chrono::DateTime<chrono::FixedOffset>,
}

impl Author {
    /// Create a new author stamped with the current local time.
    pub fn new(name: String, email: String) -> Self {
        Author {
            name,
            email,
            timestamp: chrono::Local::now().fixed_offset(),
        }
    }

    pub fn new_with_timestamp(
        name: String,
        email: String,
        timestamp: chrono::DateTime<chrono::FixedOffset>,
    ) -> Self {
        Author {
            name,
            email,
            timestamp,
        }
    }

    /// "Name <email@example.com>"
    pub fn display_name(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }

    /// "Name <email> timestamp timezone" as written into the object.
    pub fn display(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.timestamp.timestamp(),
            self.timestamp.format("%z")
        )
    }

    /// Load author information from GIT_AUTHOR_NAME / GIT_AUTHOR_EMAIL,
    /// with GIT_AUTHOR_DATE honoured when parseable.
    pub fn load_from_env() -> anyhow::Result<Self> {
        let name = std::env::var("GIT_AUTHOR_NAME").context("GIT_AUTHOR_NAME not set")?;
        let email = std::env::var("GIT_AUTHOR_EMAIL").context("GIT_AUTHOR_EMAIL not set")?;
        let timestamp = std::env::var("GIT_AUTHOR_DATE").ok().and_then(|date_str| {
            chrono::DateTime::parse_from_rfc2822(&date_str)
                .or_else(|_| chrono::DateTime::parse_from_str(&date_str, "%Y-%m-%d %H:%M:%S %z"))
                .ok()
        });

        match timestamp {
            Some(ts) => Ok(Author::new_with_timestamp(name, email, ts)),
            None => Ok(Author::new(name, email)),
        }
    }

    pub fn timestamp(&self) -> chrono::DateTime<chrono::FixedOffset> {
        self.timestamp
    }
}

impl TryFrom<&str> for Author {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Format: "name <email> timestamp timezone"
        // Split from the right to get timezone and timestamp first
        let parts: Vec<&str> = value.rsplitn(3, ' ').collect();
        if parts.len() < 3 {
            return Err(CoreError::Corrupt("invalid author line".to_string()).into());
        }

        let timezone = parts[0];
        let timestamp = parts[1]
            .parse::<i64>()
            .map_err(|_| CoreError::Corrupt("invalid author timestamp".to_string()))?;
        let name_email_part = parts[2]; // "name <email>"

        let email_start = name_email_part
            .find('<')
            .ok_or_else(|| CoreError::Corrupt("author line missing '<'".to_string()))?;
        let email_end = name_email_part
            .find('>')
            .ok_or_else(|| CoreError::Corrupt("author line missing '>'".to_string()))?;

        let name = name_email_part[..email_start].trim().to_string();
        let email = name_email_part[email_start + 1..email_end].to_string();

        let datetime = chrono::DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| CoreError::Corrupt("invalid author timestamp".to_string()))?;
        let datetime = chrono::DateTime::parse_from_str(
            &format!("{} {}", datetime.format("%Y-%m-%d %H:%M:%S"), timezone),
            "%Y-%m-%d %H:%M:%S %z",
        )
        .map_err(|_| CoreError::Corrupt("invalid author timezone".to_string()))?;

        Ok(Author {
            name,
            email,
            timestamp: datetime,
        })
    }
}

/// Git commit object
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Commit {
    /// Parent commit IDs (empty for the initial commit, multiple for merges)
    parents: Vec<ObjectId>,
    /// Tree object ID representing the directory snapshot
    tree_oid: ObjectId,
    author: Author,
    committer: Author,
    /// Message charset, when a non-default one was recorded
    encoding: Option<String>,
    message: String,
}

impl Commit {
    pub fn new(
        parents: Vec<ObjectId>,
        tree_oid: ObjectId,
        author: Author,
        message: String,
    ) -> Self {
        Commit {
            parents,
            tree_oid,
            author: author.clone(),
            committer: author,
            encoding: None,
            message,
        }
    }

    /// First line of the message, for short-form display.
    pub fn short_message(&self) -> String {
        self.message.lines().next().unwrap_or("").to_string()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn tree_oid(&self) -> &ObjectId {
        &self.tree_oid
    }

    pub fn parents(&self) -> &[ObjectId] {
        &self.parents
    }

    pub fn parent(&self) -> Option<&ObjectId> {
        self.parents.first()
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn committer(&self) -> &Author {
        &self.committer
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn timestamp(&self) -> chrono::DateTime<chrono::FixedOffset> {
        self.author.timestamp()
    }

    fn header_lines(&self) -> Vec<String> {
        let mut lines = vec![];

        lines.push(format!("tree {}", self.tree_oid));
        for parent in &self.parents {
            lines.push(format!("parent {parent}"));
        }
        lines.push(format!("author {}", self.author.display()));
        lines.push(format!("committer {}", self.committer.display()));
        if let Some(encoding) = &self.encoding {
            lines.push(format!("encoding {encoding}"));
        }

        lines
    }
}

impl Packable for Commit {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut object_content = self.header_lines();
        object_content.push(String::new());
        object_content.push(self.message.to_string());

        let object_content = object_content.join("\n");

        let mut commit_bytes = Vec::new();
        let header = format!("{} {}\0", self.object_type().as_str(), object_content.len());
        commit_bytes.write_all(header.as_bytes())?;
        commit_bytes.write_all(object_content.as_bytes())?;

        Ok(Bytes::from(commit_bytes))
    }
}

impl Unpackable for Commit {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let content = reader
            .bytes()
            .collect::<Result<Vec<u8>, std::io::Error>>()?;

        let content = String::from_utf8(content)
            .map_err(|_| CoreError::Corrupt("non-utf8 commit object".to_string()))?;
        let mut lines = content.lines();

        let tree_line = lines
            .next()
            .context("invalid commit object: missing tree line")?;
        let tree_oid = tree_line
            .strip_prefix("tree ")
            .context("invalid commit object: invalid tree line")?;
        let tree_oid = ObjectId::try_parse(tree_oid)?;

        // Parse all parent lines (there can be 0, 1, or multiple parents)
        let mut parents = Vec::new();
        let mut next_line = lines
            .next()
            .context("invalid commit object: missing author line")?;

        while let Some(parent_oid) = next_line.strip_prefix("parent ") {
            parents.push(ObjectId::try_parse(parent_oid)?);

            next_line = lines
                .next()
                .context("invalid commit object: missing author line")?;
        }

        let author = next_line
            .strip_prefix("author ")
            .context("invalid commit object: invalid author line")?;
        let author = Author::try_from(author)?;

        let committer_line = lines
            .next()
            .context("invalid commit object: missing committer line")?;
        let committer = committer_line
            .strip_prefix("committer ")
            .context("invalid commit object: invalid committer line")?;
        let committer = Author::try_from(committer)?;

        // Optional headers between committer and the blank separator line
        let mut encoding = None;
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if let Some(charset) = line.strip_prefix("encoding ") {
                encoding = Some(charset.to_string());
            }
        }

        let message = lines.collect::<Vec<&str>>().join("\n");

        Ok(Commit {
            parents,
            tree_oid,
            author,
            committer,
            encoding,
            message,
        })
    }
}

impl Object for Commit {
    fn object_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn display(&self) -> String {
        let mut lines = self.header_lines();
        lines.push(String::new());
        lines.push(self.message.to_string());

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn fixed_author() -> Author {
        let ts = chrono::DateTime::parse_from_str(
            "2024-03-01 12:00:00 +0200",
            "%Y-%m-%d %H:%M:%S %z",
        )
        .unwrap();
        Author::new_with_timestamp("Ada".to_string(), "ada@example.com".to_string(), ts)
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let tree = ObjectId::digest(b"tree payload");
        let parent = ObjectId::digest(b"parent payload");
        let commit = Commit::new(
            vec![parent],
            tree,
            fixed_author(),
            "subject\n\nbody".to_string(),
        );

        let bytes = commit.serialize().unwrap();
        let mut reader = Cursor::new(bytes.to_vec());
        ObjectType::parse_object_header(&mut reader).unwrap();
        let parsed = Commit::deserialize(reader).unwrap();

        assert_eq!(parsed, commit);
    }

    #[test]
    fn deserialize_reads_encoding_header() {
        let raw = b"tree 2ef267e25bd6c6a300bb473e604b092b6064512d\n\
            author Ada <ada@example.com> 1709287200 +0200\n\
            committer Ada <ada@example.com> 1709287200 +0200\n\
            encoding ISO-8859-1\n\
            \n\
            subject";
        let parsed = Commit::deserialize(Cursor::new(raw.to_vec())).unwrap();
        assert_eq!(parsed.encoding(), Some("ISO-8859-1"));
        assert_eq!(parsed.short_message(), "subject");
        assert!(parsed.parent().is_none());
    }
}
