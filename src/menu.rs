//! Interactive menu as an explicit state machine
//!
//! The menu never touches the device. [`Menu::press`] turns controller input
//! into an optional [`MenuAction`]; the caller runs the action and reports
//! back through [`Menu::complete`], which decides where the menu goes next.

use crate::layout::PartitionId;
use bitflags::bitflags;

bitflags! {
    /// Controller buttons (bit values follow the Dreamcast controller)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u32 {
        const C = 1 << 0;
        const B = 1 << 1;
        const A = 1 << 2;
        const START = 1 << 3;
        const Z = 1 << 8;
        const Y = 1 << 9;
        const X = 1 << 10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    /// Warning screen: Y continues, B exits
    Disclaimer,
    Main,
    /// Waiting for A+B (confirm) or START (cancel)
    ConfirmEraseSerials,
    ConfirmEraseFlash,
    Debug,
    /// An action is running; input is ignored until it completes
    Busy(MenuAction),
    Exited,
    Rebooting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    ShowSerialNumbers,
    EraseSerialNumbers,
    EraseFlashrom,
    DumpFlashrom,
    DumpPartition(PartitionId),
    Exit,
}

/// How a requested action went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    NothingFound,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Menu {
    state: MenuState,
    last: Buttons,
}

impl Default for Menu {
    fn default() -> Self {
        Self::new()
    }
}

impl Menu {
    pub fn new() -> Self {
        Menu {
            state: MenuState::Disclaimer,
            last: Buttons::empty(),
        }
    }

    pub fn state(&self) -> MenuState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, MenuState::Exited | MenuState::Rebooting)
    }

    /// Feed one input sample
    pub fn press(&mut self, buttons: Buttons) -> Option<MenuAction> {
        match self.state {
            MenuState::Disclaimer => {
                if buttons.contains(Buttons::B) {
                    self.state = MenuState::Exited;
                    Some(MenuAction::Exit)
                } else {
                    if buttons.contains(Buttons::Y) {
                        self.enter(MenuState::Main);
                    }
                    None
                }
            }
            MenuState::Main => self.press_main(buttons),
            MenuState::ConfirmEraseSerials => {
                self.press_confirm(buttons, MenuAction::EraseSerialNumbers)
            }
            MenuState::ConfirmEraseFlash => self.press_confirm(buttons, MenuAction::EraseFlashrom),
            MenuState::Debug => self.press_debug(buttons),
            MenuState::Busy(_) | MenuState::Exited | MenuState::Rebooting => None,
        }
    }

    /// Report the result of the action returned by the last `press`
    pub fn complete(&mut self, outcome: ActionOutcome) {
        let MenuState::Busy(action) = self.state else {
            return;
        };

        self.state = match (action, outcome) {
            (MenuAction::EraseSerialNumbers, ActionOutcome::Failed) => MenuState::Rebooting,
            (MenuAction::EraseFlashrom, _) => MenuState::Rebooting,
            (MenuAction::DumpFlashrom | MenuAction::DumpPartition(_), _) => MenuState::Debug,
            (MenuAction::Exit, _) => MenuState::Exited,
            _ => MenuState::Main,
        };

        // Buttons still held after showing serials must not fire again
        if action != MenuAction::ShowSerialNumbers {
            self.last = Buttons::empty();
        }
    }

    fn enter(&mut self, state: MenuState) {
        self.state = state;
        self.last = Buttons::empty();
    }

    fn start(&mut self, action: MenuAction) -> Option<MenuAction> {
        self.state = MenuState::Busy(action);
        Some(action)
    }

    fn press_main(&mut self, buttons: Buttons) -> Option<MenuAction> {
        // Only react to buttons that were not already held
        let fresh = buttons - self.last;
        self.last = buttons;

        if buttons.contains(Buttons::START) {
            self.state = MenuState::Exited;
            Some(MenuAction::Exit)
        } else if buttons.contains(Buttons::A | Buttons::Y) {
            self.enter(MenuState::Debug);
            None
        } else if fresh.contains(Buttons::A) {
            self.start(MenuAction::ShowSerialNumbers)
        } else if fresh.contains(Buttons::B) {
            self.enter(MenuState::ConfirmEraseSerials);
            None
        } else if fresh.contains(Buttons::X) {
            self.enter(MenuState::ConfirmEraseFlash);
            None
        } else {
            None
        }
    }

    fn press_confirm(&mut self, buttons: Buttons, action: MenuAction) -> Option<MenuAction> {
        if buttons.contains(Buttons::START) {
            self.enter(MenuState::Main);
            None
        } else if buttons.contains(Buttons::A | Buttons::B) {
            self.start(action)
        } else {
            None
        }
    }

    fn press_debug(&mut self, buttons: Buttons) -> Option<MenuAction> {
        if buttons.contains(Buttons::START) {
            self.enter(MenuState::Main);
            None
        } else if buttons.contains(Buttons::A) {
            self.start(MenuAction::DumpFlashrom)
        } else if buttons.contains(Buttons::B) {
            self.start(MenuAction::DumpPartition(PartitionId::Block1))
        } else if buttons.contains(Buttons::X) {
            self.start(MenuAction::DumpPartition(PartitionId::Settings))
        } else {
            None
        }
    }
}
