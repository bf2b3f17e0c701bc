// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod builtin;
pub mod policy;
pub mod registry;
pub mod tool;

pub use policy::ApprovalPolicy;
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart};

pub use builtin::agent_comm::{
    AgentEvent, AssignTaskTool, AssignTasksTool, AuditFilesTool, CallbackType,
    ConfirmTaskCompleteTool, RaiseCallbackTool, TaskAssignment,
};
pub use builtin::code_exec::{RunPythonTool, RunTestsTool};
pub use builtin::edit_file::EditFileTool;
pub use builtin::file_ops::{
    AppendFileTool, DeleteFileTool, GetFileInfoTool, ListAllFilesTool, ListDirectoryTool,
    ReadFileTool, SearchFilesTool, WriteFileTool,
};
pub use builtin::git_ops::{CheckoutBranchTool, CloneRepoTool, CreatePullRequestTool, PushBranchTool};
pub use builtin::package_ops::{
    CheckPackageInstalledTool, InstallPackageTool, ListInstalledPackagesTool, SearchPackageTool,
};
