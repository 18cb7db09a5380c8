use crate::app::InputMode;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    GoToPage(u8),
    ToggleMenu,
    Escape,
    Back,
    Refresh,
    Down,
    Up,
    Left,
    Right,
    PageDown,
    PageUp,
    Top,
    Bottom,
    Open,
    ShowYaml,
    Describe,
    Logs,
    Edit,
    Shell,
    Delete,
    StartSearch,
    StartCommand,
    SubmitInput,
    CancelInput,
    Backspace,
    InputChar(char),
    ConfirmYes,
    ConfirmNo,
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::Search | InputMode::Command => map_input_mode_key(key),
        InputMode::Confirm => map_confirm_mode_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => Some(Action::Quit),
        KeyCode::Char('d') if ctrl => Some(Action::Delete),
        KeyCode::Char('f') if ctrl => Some(Action::PageDown),
        KeyCode::Char('b') if ctrl => Some(Action::PageUp),
        _ if ctrl => None,
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char(c) if c.is_ascii_digit() => {
            Some(Action::GoToPage(c.to_digit(10).unwrap_or(0) as u8))
        }
        KeyCode::Char('m') => Some(Action::ToggleMenu),
        KeyCode::Esc => Some(Action::Escape),
        KeyCode::Enter => Some(Action::Open),
        KeyCode::Char('b') | KeyCode::Backspace => Some(Action::Back),
        KeyCode::Char('r') | KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Up),
        KeyCode::Left => Some(Action::Left),
        KeyCode::Right => Some(Action::Right),
        KeyCode::PageDown => Some(Action::PageDown),
        KeyCode::PageUp => Some(Action::PageUp),
        KeyCode::Char('g') | KeyCode::Home => Some(Action::Top),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Char('y') => Some(Action::ShowYaml),
        KeyCode::Char('d') => Some(Action::Describe),
        KeyCode::Char('l') => Some(Action::Logs),
        KeyCode::Char('e') => Some(Action::Edit),
        KeyCode::Char('s') => Some(Action::Shell),
        KeyCode::Char('/') => Some(Action::StartSearch),
        KeyCode::Char(':') => Some(Action::StartCommand),
        _ => None,
    }
}

fn map_input_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Char('m') | KeyCode::Char('j')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(Action::SubmitInput)
        }
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
            Some(Action::InputChar(c))
        }
        _ => None,
    }
}

fn map_confirm_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => Some(Action::ConfirmYes),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Some(Action::ConfirmNo),
        _ => None,
    }
}
