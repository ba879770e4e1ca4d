//! 中期记忆：当前目标、已尝试的工具、失败原因、纠正提示
//!
//! 只在单个推理会话内有效，拼入 system prompt（Current Goal / What has been tried / Failures / Notes），
//! 让下一次 Think 避开已失败两次的工具。

#[derive(Clone, Debug, Default)]
pub struct WorkingMemory {
    pub goal: Option<String>,
    pub attempts: Vec<String>,
    pub failures: Vec<String>,
    /// RetryWithPrompt 产生的纠正提示
    pub notes: Vec<String>,
    /// Branch 后应避开的工具
    pub avoided_tools: Vec<String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.goal = Some(goal.into());
    }

    pub fn add_attempt(&mut self, attempt: impl Into<String>) {
        self.attempts.push(attempt.into());
    }

    pub fn add_failure(&mut self, failure: impl Into<String>) {
        self.failures.push(failure.into());
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn avoid_tool(&mut self, tool: impl Into<String>) {
        let tool = tool.into();
        if !self.avoided_tools.contains(&tool) {
            self.avoided_tools.push(tool);
        }
    }

    /// 从 attempts（格式 "tool -> observation"）中提取工具名列表
    pub fn tool_names_used(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .attempts
            .iter()
            .filter_map(|a| a.split(" -> ").next().map(|s| s.trim().to_string()))
            .collect();
        names.dedup();
        names
    }

    /// 构建供 Planner 使用的 Prompt 片段
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        if let Some(goal) = &self.goal {
            s.push_str(&format!("## Current Goal\n{}\n\n", goal));
        }
        if !self.attempts.is_empty() {
            s.push_str("## What has been tried\n");
            for a in &self.attempts {
                s.push_str(&format!("- {}\n", a));
            }
            s.push('\n');
        }
        if !self.failures.is_empty() {
            s.push_str("## Failures\n");
            for f in &self.failures {
                s.push_str(&format!("- {}\n", f));
            }
            if !self.avoided_tools.is_empty() {
                s.push_str(&format!(
                    "Do not call these tools again: {}\n",
                    self.avoided_tools.join(", ")
                ));
            }
            s.push('\n');
        }
        if !self.notes.is_empty() {
            s.push_str("## Notes\n");
            for n in &self.notes {
                s.push_str(&format!("- {}\n", n));
            }
            s.push('\n');
        }
        s
    }
}
