use std::collections::HashMap;

pub struct I18n {
    translations: HashMap<String, HashMap<String, String>>,
    current_lang: String,
}

impl I18n {
    pub fn new(lang: &str) -> Self {
        let mut translations = HashMap::new();

        // 英文
        let mut en = HashMap::new();
        en.insert("welcome".to_string(), "SmartShell {0} ({1}). Describe what you want to do; type exit to quit, history to see recent commands.".to_string());
        en.insert("goodbye".to_string(), "Bye".to_string());
        en.insert("interrupt_hint".to_string(), "Type exit or press Ctrl-D to quit".to_string());
        en.insert("history_empty".to_string(), "No commands yet".to_string());
        en.insert("history_entry".to_string(), "{0}  {1}  ->  {2}".to_string());

        // Runtime messages
        en.insert("executing".to_string(), "Executing: {0}".to_string());
        en.insert("translated".to_string(), "Command: {0}".to_string());
        en.insert("directory_changed".to_string(), "Now in {0}".to_string());
        en.insert("command_failed".to_string(), "Exit code {0} after {1}ms".to_string());
        en.insert("partial_output".to_string(), "Output captured before the timeout:".to_string());

        // Error messages
        en.insert("translate_failed".to_string(), "Could not turn that into a command: {0}".to_string());
        en.insert("execute_failed".to_string(), "Failed to run: {0}".to_string());
        en.insert("busy".to_string(), "Still working on the previous request, try again when it finishes".to_string());
        en.insert("retry_hint".to_string(), "The language model may be temporarily unavailable; try again in a moment".to_string());
        en.insert("config_hint".to_string(), "Config file: {0}".to_string());

        // 中文
        let mut zh = HashMap::new();
        zh.insert("welcome".to_string(), "SmartShell {0} ({1})。用自然语言描述你想做的事；输入 exit 退出，history 查看最近的命令。".to_string());
        zh.insert("goodbye".to_string(), "再见".to_string());
        zh.insert("interrupt_hint".to_string(), "输入 exit 或按 Ctrl-D 退出".to_string());
        zh.insert("history_empty".to_string(), "还没有命令".to_string());
        zh.insert("history_entry".to_string(), "{0}  {1}  ->  {2}".to_string());

        zh.insert("executing".to_string(), "执行: {0}".to_string());
        zh.insert("translated".to_string(), "命令: {0}".to_string());
        zh.insert("directory_changed".to_string(), "当前目录 {0}".to_string());
        zh.insert("command_failed".to_string(), "退出码 {0}，耗时 {1}ms".to_string());
        zh.insert("partial_output".to_string(), "超时前捕获的输出:".to_string());

        zh.insert("translate_failed".to_string(), "无法转换为命令: {0}".to_string());
        zh.insert("execute_failed".to_string(), "执行失败: {0}".to_string());
        zh.insert("busy".to_string(), "上一个请求仍在处理中，请稍后再试".to_string());
        zh.insert("retry_hint".to_string(), "语言模型可能暂时不可用，请稍后重试".to_string());
        zh.insert("config_hint".to_string(), "配置文件: {0}".to_string());

        translations.insert("en".to_string(), en);
        translations.insert("zh".to_string(), zh);

        // 确定语言 - 支持多种语言代码格式
        let effective_lang = if lang.starts_with("zh") || lang == "cn" || lang == "chinese" {
            "zh"
        } else {
            "en"
        };

        Self {
            translations,
            current_lang: effective_lang.to_string(),
        }
    }

    pub fn t(&self, key: &str) -> String {
        if let Some(lang_map) = self.translations.get(&self.current_lang) {
            if let Some(value) = lang_map.get(key) {
                return value.clone();
            }
        }
        key.to_string()
    }

    pub fn t_format(&self, key: &str, args: &[&str]) -> String {
        let template = self.t(key);
        let mut result = template;
        for (i, arg) in args.iter().enumerate() {
            result = result.replace(&format!("{{{}}}", i), arg);
        }
        result
    }
}
