//! Git annotated tag object
//!
//! Tags name another object (usually a commit) with a message and an
//! optional tagger.
//!
//! On disk:
//! ```text
//! tag <size>\0
//! object <target-sha>
//! type <target-kind>
//! tag <name>
//! tagger <name> <email> <timestamp> <timezone>
//!
//! <message>
//! ```

use crate::artifacts::core::CoreError;
use crate::artifacts::objects::commit::Author;
use crate::artifacts::objects::object::{Object, Packable, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bytes::Bytes;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Tag {
    /// The tagged object
    target: ObjectId,
    /// Kind of the tagged object
    target_type: ObjectType,
    name: String,
    tagger: Option<Author>,
    message: String,
}

impl Tag {
    pub fn new(
        target: ObjectId,
        target_type: ObjectType,
        name: String,
        tagger: Option<Author>,
        message: String,
    ) -> Self {
        Tag {
            target,
            target_type,
            name,
            tagger,
            message,
        }
    }

    pub fn target(&self) -> &ObjectId {
        &self.target
    }

    pub fn target_type(&self) -> ObjectType {
        self.target_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tagger(&self) -> Option<&Author> {
        self.tagger.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn header_lines(&self) -> Vec<String> {
        let mut lines = vec![];

        lines.push(format!("object {}", self.target));
        lines.push(format!("type {}", self.target_type));
        lines.push(format!("tag {}", self.name));
        if let Some(tagger) = &self.tagger {
            lines.push(format!("tagger {}", tagger.display()));
        }

        lines
    }
}

impl Packable for Tag {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut object_content = self.header_lines();
        object_content.push(String::new());
        object_content.push(self.message.to_string());

        let object_content = object_content.join("\n");

        let mut tag_bytes = Vec::new();
        let header = format!("{} {}\0", self.object_type().as_str(), object_content.len());
        tag_bytes.write_all(header.as_bytes())?;
        tag_bytes.write_all(object_content.as_bytes())?;

        Ok(Bytes::from(tag_bytes))
    }
}

impl Unpackable for Tag {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let content = reader
            .bytes()
            .collect::<Result<Vec<u8>, std::io::Error>>()?;

        let content = String::from_utf8(content)
            .map_err(|_| CoreError::Corrupt("non-utf8 tag object".to_string()))?;
        let mut lines = content.lines();

        let target = lines
            .next()
            .and_then(|line| line.strip_prefix("object "))
            .context("invalid tag object: missing object line")?;
        let target = ObjectId::try_parse(target)?;

        let target_type = lines
            .next()
            .and_then(|line| line.strip_prefix("type "))
            .context("invalid tag object: missing type line")?;
        let target_type = ObjectType::try_from(target_type)?;

        let name = lines
            .next()
            .and_then(|line| line.strip_prefix("tag "))
            .context("invalid tag object: missing tag line")?
            .to_string();

        let mut tagger = None;
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if let Some(author) = line.strip_prefix("tagger ") {
                tagger = Some(Author::try_from(author)?);
            }
        }

        let message = lines.collect::<Vec<&str>>().join("\n");

        Ok(Tag {
            target,
            target_type,
            name,
            tagger,
            message,
        })
    }
}

impl Object for Tag {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn display(&self) -> String {
        let mut lines = self.header_lines();
        lines.push(String::new());
        lines.push(self.message.to_string());

        lines.join("\n")
    }
}
