//! Fixed reply texts sent by the dialogue engine.

pub const GREETING: &str = "Привет! Давай заполним документ.";

pub const CANCELLED: &str = "Окей, отменил. Чтобы начать заново — /start";

pub const NO_SESSION: &str = "Отправь /start чтобы начать заполнение документа.";

pub const SESSION_EXPIRED: &str = "Похоже, сессия устарела. Напиши /start.";

pub const DONE: &str = "Готово! Если нужно ещё — /start";

const RENDER_FAILED_PREFIX: &str = "Ошибка при генерации документа: ";

/// Reply to `/start`: greeting followed by the first question.
pub fn start(first_prompt: &str) -> String {
    format!("{GREETING}\n\n{first_prompt}")
}

/// Reply when document generation fails.
pub fn render_failed(reason: &str) -> String {
    format!("{RENDER_FAILED_PREFIX}{reason}")
}
