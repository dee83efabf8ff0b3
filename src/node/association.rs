//! Association command class (0x85).

use crate::error::{Error, Result};
use crate::node::classes::command_class;
use crate::node::{Node, ReportFilter};

const COMMAND_SET: u8 = 0x01;
const COMMAND_GET: u8 = 0x02;
const COMMAND_REPORT: u8 = 0x03;
const COMMAND_REMOVE: u8 = 0x04;
const COMMAND_GROUPINGS_GET: u8 = 0x05;
const COMMAND_GROUPINGS_REPORT: u8 = 0x06;

/// Association façade.
pub struct Association<'a> {
    node: &'a Node,
}

impl Node {
    /// Returns the association façade if the node supports the class.
    pub async fn association(&self) -> Option<Association<'_>> {
        if self.supports_command_class(command_class::ASSOCIATION).await {
            Some(Association { node: self })
        } else {
            None
        }
    }
}

impl Association<'_> {
    /// Adds nodes to an association group.
    pub async fn add(&self, group: u8, nodes: &[u8]) -> Result<()> {
        let mut payload = vec![COMMAND_SET, group];
        payload.extend_from_slice(nodes);
        self.node.send(command_class::ASSOCIATION, &payload).await
    }

    /// Removes nodes from an association group.
    pub async fn remove(&self, group: u8, nodes: &[u8]) -> Result<()> {
        let mut payload = vec![COMMAND_REMOVE, group];
        payload.extend_from_slice(nodes);
        self.node.send(command_class::ASSOCIATION, &payload).await
    }

    /// Removes every node from the group.
    pub async fn remove_all_from_group(&self, group: u8) -> Result<()> {
        self.remove(group, &[]).await
    }

    /// Removes the nodes from every group. V2 only.
    pub async fn remove_from_all_groups(&self, nodes: &[u8]) -> Result<()> {
        self.remove(0, nodes).await
    }

    /// Gets the members of an association group, returning
    /// (max group size, member node ids).
    pub async fn get(&self, group: u8) -> Result<(u8, Vec<u8>)> {
        let filter: ReportFilter<'_> =
            &move |report| !report.command.data.is_empty() && report.command.data[0] == group;
        let report = self
            .node
            .send_and_await(
                command_class::ASSOCIATION,
                &[COMMAND_GET, group],
                COMMAND_REPORT,
                Some(filter),
            )
            .await?;

        let data = &report.command.data;
        if data.len() < 3 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }
        // data[2] counts reports-to-follow for oversized groups.
        Ok((data[1], data[3..].to_vec()))
    }

    /// Gets the number of association groups the node supports.
    pub async fn supported_groups(&self) -> Result<u8> {
        let report = self
            .node
            .send_and_await(
                command_class::ASSOCIATION,
                &[COMMAND_GROUPINGS_GET],
                COMMAND_GROUPINGS_REPORT,
                None,
            )
            .await?;

        let data = &report.command.data;
        if data.len() != 1 {
            return Err(Error::protocol(format!("bad report length: {}", data.len())));
        }
        Ok(data[0])
    }
}
