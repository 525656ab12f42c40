use std::fmt;

/// State-change notifications a runtime host pushes to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportCommand {
    ImageList,
    ImageCreated,
    ImageUpdated,
    ImageDeleted,
    ContainerList,
    ContainerCreated,
    ContainerUpdated,
    ContainerDeleted,
}

impl ReportCommand {
    pub const ALL: [ReportCommand; 8] = [
        ReportCommand::ImageList,
        ReportCommand::ImageCreated,
        ReportCommand::ImageUpdated,
        ReportCommand::ImageDeleted,
        ReportCommand::ContainerList,
        ReportCommand::ContainerCreated,
        ReportCommand::ContainerUpdated,
        ReportCommand::ContainerDeleted,
    ];

    pub fn from_wire(command: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().as_bytes() == command)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReportCommand::ImageList => "report_image_list",
            ReportCommand::ImageCreated => "report_image_created",
            ReportCommand::ImageUpdated => "report_image_updated",
            ReportCommand::ImageDeleted => "report_image_deleted",
            ReportCommand::ContainerList => "report_container_list",
            ReportCommand::ContainerCreated => "report_container_created",
            ReportCommand::ContainerUpdated => "report_container_updated",
            ReportCommand::ContainerDeleted => "report_container_deleted",
        }
    }
}

impl fmt::Display for ReportCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_are_unique_and_resolvable() {
        for command in ReportCommand::ALL {
            assert_eq!(ReportCommand::from_wire(command.as_str().as_bytes()), Some(command));
        }
        assert_eq!(ReportCommand::from_wire(b"report_container"), None);
        assert_eq!(ReportCommand::from_wire(b"agent_internal_heartbeat"), None);
    }
}
