//! User- and operator-facing texts.

use super::event::Caller;
use super::session::{CompletedRequest, Session, Slot};

pub const WELCOME: &str =
    "Привет! Я бот по ремонту техники Apple.\nВыберите категорию, чтобы узнать о видах услуг:";
pub const CHOOSE_CATEGORY: &str = "Пожалуйста, выберите категорию:";
pub const BACK_LABEL: &str = "« Назад";
pub const CONTACT_MANAGER_LABEL: &str = "Связаться с менеджером";
pub const THANKS: &str = "Спасибо! Ваша заявка отправлена.\nНаш менеджер скоро свяжется с вами.";
pub const CANCELLED: &str =
    "Оформление заявки прервано.\nЕсли захотите начать заново, отправьте /start.";
pub const INVALID_SELECTION: &str = "Пожалуйста, выберите один из предложенных вариантов.";
pub const EMPTY_CONTACTS: &str = "Контактные данные не могут быть пустыми.";
pub const UNSUPPORTED_COMMAND: &str =
    "Неизвестная команда. Доступные команды: /start, /back, /cancel.";

const NO_USERNAME: &str = "(нет username)";

pub fn unknown_category(category: &str) -> String {
    format!("Неизвестная категория: {category}.\nОтправьте /start, чтобы начать заново.")
}

pub fn choose_model(category: &str) -> String {
    format!("Вы выбрали: {category}.\nТеперь выберите модель:")
}

pub fn choose_service(model: &str) -> String {
    format!("Вы выбрали: {model}.\nТеперь выберите услугу:")
}

/// Recap of the choices so far followed by the request for contact details.
///
/// Skipped stages are left out of the recap.
pub fn ask_contacts(session: &Session) -> String {
    let mut lines = vec!["Отлично! Вы выбрали:".to_string()];
    if let Some(ref category) = session.category {
        lines.push(format!("- Категория: {category}"));
    }
    if let Some(Slot::Chosen(ref model)) = session.model {
        lines.push(format!("- Модель: {model}"));
    }
    if let Some(Slot::Chosen(ref service)) = session.service {
        lines.push(format!("- Услуга: {service}"));
    }
    lines.push(String::new());
    lines.push(
        "Пожалуйста, оставьте свои контактные данные, чтобы наш менеджер мог связаться с вами.\n\
         Например: ваше имя, номер телефона и удобное время для звонка."
            .to_string(),
    );
    lines.join("\n")
}

/// Who sent the request: display name when known, then @username and id.
fn caller_line(caller: &Caller) -> String {
    let id = &caller.user_id;
    match (&caller.display_name, &caller.username) {
        (Some(name), Some(username)) => format!("{name} (@{username}, ID: {id})"),
        (Some(name), None) => format!("{name} (ID: {id})"),
        (None, Some(username)) => format!("@{username} (ID: {id})"),
        (None, None) => format!("{NO_USERNAME} (ID: {id})"),
    }
}

/// Summary delivered to the operator.
pub fn operator_summary(request: &CompletedRequest) -> String {
    format!(
        "Новая заявка!\n\n\
         Пользователь: {}\n\
         Категория: {}\n\
         Модель: {}\n\
         Услуга: {}\n\
         Контакты: {}",
        caller_line(&request.caller),
        request.category,
        request.model,
        request.service,
        request.contacts
    )
}
