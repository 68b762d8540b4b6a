mod adapters;
mod alarm_and_timeout;
mod common;
mod modbus_tcp;
mod vision_cycle;
