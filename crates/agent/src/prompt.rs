//! System prompt and environment message assembly.
//!
//! The system prompt is built in two passes: the mode and the prompt
//! arguments decide which sections exist, then [`render`] fills the
//! `{tool_prompt}`, `{mcp_prompt}`, `{extra_prompt}`, `{memory_list}` and
//! system-information slots. Literal JSON braces in the sections are
//! written doubled.

use reagent_core::agent::AgentMode;
use reagent_core::chat::Chat;
use reagent_tools::render;
use serde_json::{Value, json};

use crate::builtin::Builtin;
use crate::settings::{AgentSettings, PromptArgs};

const DEFAULT_ROLE: &str = "You are reagent, an all-around AI assistant built to solve the tasks users bring. You use tools to complete complex requests efficiently.";

const PROCESS: &str = "You strictly follow the cycle of thinking first, then acting, then observing:
1. Thinking: describe your thought process or plan for the problem
2. Action: based on that thinking, choose the tool to call
3. Observation: analyze the result of the action and feed it into your next thought

Tool usage:
You may use one tool per message, and you receive its result in the user's reply. Work towards the goal step by step, adjusting each tool call to the result of the previous one.";

const TODOLIST_GUIDE: &str = "
For complex tasks:
1. Analyze the task and design the workflow steps.
2. Break the task into subtasks and add them with `add_subtasks`.
3. Call `complete_subtasks` right after finishing each subtask, to keep the task on track and the progress traceable.
4. Do not move on to the next subtask before its completion is confirmed with `complete_subtasks`.";

const FINAL_SUBTASK_RULE: &str = "5. The last subtask of every breakdown must be: **Summarize the workflow steps.**";

const OUTPUT_FORMAT: &str = r#"====

# Tool usage format

Reply with pure JSON only. Never wrap it in Markdown code fences and never add explanations or other text around it. Structure:

{{
  "thinking": "[Thinking process]",
  "tool": "[Tool name]",
  "params": {{
    "[parameter1_name]": "[value1]",
    "[parameter2_name]": "[value2]"
  }}
}}

Always follow this format so the tool call can be parsed and executed."#;

const OPERATION_MODES: &str = "====

{extra_prompt}

====

# Operation modes

## Automatic mode
- Cannot use: planning and feedback tools
- Runs fully autonomously
- Finish with `enter_idle_state`

## Execution mode
- Cannot use: planning tools
- Runs interactively and asks for confirmation
- Finish with `enter_idle_state`

## Planning mode
- Can only use `plan_mode_response` and read-only tools
- Gather context, design a detailed plan, get the user's approval, then switch modes

====

# Memory list

- Every reasoning round has a unique `memory_id`
- Older rounds are listed under Memory List with their thinking and tool name
- Use `memory_retrieval` to review a round before repeating its work
";

/// Everything that fills the system prompt slots.
#[derive(Debug, Clone, Default)]
pub struct PromptContext<'a> {
    pub tool_prompts: &'a [String],
    pub mcp_prompt: &'a str,
    pub memory_list: &'a [Value],
}

/// The section skeleton for `mode`, with slots still unfilled.
pub fn system_template(mode: AgentMode, args: &PromptArgs) -> String {
    let flash = mode == AgentMode::Flash;
    let mut out = String::new();

    out.push_str(args.agent_prompt.as_deref().unwrap_or(DEFAULT_ROLE));
    out.push_str("\n\n");
    out.push_str(PROCESS);
    out.push('\n');
    if args.todolist && !flash {
        out.push_str(TODOLIST_GUIDE);
        out.push('\n');
        if !args.subagent {
            out.push_str(FINAL_SUBTASK_RULE);
            out.push('\n');
        }
    }
    out.push('\n');
    out.push_str(OUTPUT_FORMAT);
    out.push_str("\n\n====\n\n# Core tools\n\n");

    let core = Builtin::ALL
        .iter()
        .filter(|b| b.visible(mode, args))
        .map(|b| b.prompt(mode))
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push_str(&core);

    out.push_str("\n\n====\n\n# Base tools\n\n{tool_prompt}\n\n====\n");
    if args.mcp_server {
        out.push_str(
            "\n# Available MCP services\n\n**Important**: every MCP service MUST be called through the core tool `mcp_server`\n\n{mcp_prompt}\n\n",
        );
    }
    if !args.subagent && !flash {
        out.push_str(OPERATION_MODES);
    }

    out.push_str(
        "\n====\n\n# Environment details explanation\n\
         - Language: the language replies must be written in\n\
         - Current time: the current system time\n\
         - Temporary folder: where temporary files go during execution\n",
    );
    if !args.subagent {
        out.push_str("- Current mode: automatic, execution, planning or flash mode\n");
    }
    out.push_str(
        "\n====\n\n# System information\n\
         - Operating system type: {system_type}\n\
         - Operating system platform: {system_platform}\n\
         - CPU architecture: {system_arch}\n\
         \n====\n\n# Memory List:\n{memory_list}\n",
    );
    out
}

/// The rendered system prompt for one step.
pub fn system_prompt(mode: AgentMode, args: &PromptArgs, settings: &AgentSettings, ctx: &PromptContext<'_>) -> String {
    let memory_list = serde_json::to_string_pretty(ctx.memory_list).unwrap_or_else(|_| "[]".into());
    let data = json!({
        "system_type": settings.system_type,
        "system_platform": settings.system_platform,
        "system_arch": settings.system_arch,
        "tool_prompt": ctx.tool_prompts.join("\n\n"),
        "mcp_prompt": ctx.mcp_prompt,
        "extra_prompt": settings.extra_prompt,
        "memory_list": memory_list,
    });
    render(&system_template(mode, args), &data)
}

/// The environment snapshot appended after the memory window.
pub fn environment_message(args: &PromptArgs, settings: &AgentSettings, chat: &Chat, time: &str) -> String {
    let mut out = format!(
        "# Environment details\n- Language: Please answer using {}\n- Current time: {}\n- Temporary folder: {}\n",
        settings.language,
        time,
        settings.tmpdir.display()
    );
    if !args.subagent {
        out.push_str(&format!("- Current mode: {}\n{}", chat.mode.label(), chat.render_envs()));
    }
    out.push('\n');
    if args.todolist {
        out.push_str(&format!("\n# TodoList\n{}\n", chat.render_todolist()));
    }
    out
}

/// Local time as `YYYY-MM-DD HH:MM:SS`.
pub fn current_time() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
